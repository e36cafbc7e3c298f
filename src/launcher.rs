//! Init launcher, supervisor side.
//!
//! Spawns the container init process: a re-invocation of this binary
//! with the hidden `init` verb, cloned into the namespaces requested by
//! the bundle. The child performs the post-namespace bring-up (pivot,
//! mounts, hostname, exec) in its own process image; the supervisor only
//! records the child's identity and, for foreground runs, waits for it.

use std::ffi::CString;

use nix::sched::clone;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, Pid};
use tracing::{debug, warn};

use crate::bundle::Bundle;
use crate::error::{Error, Result};
use crate::process;

/// Stack for the cloned child. The child only execs, so a small stack
/// suffices.
const INIT_STACK_SIZE: usize = 256 * 1024;

/// Identity of a spawned init process.
#[derive(Debug, Clone, Copy)]
pub struct InitHandle {
    /// Init process id in the supervisor's pid namespace.
    pub pid: i32,
    /// Kernel start-time marker, clock ticks since boot.
    pub start_time: u64,
}

/// Spawns the init process for a container and records its identity.
///
/// The child invocation is `corral init --bundle <dir> <id>`, exec'd
/// from `/proc/self/exe` so the same binary serves both roles. Clone
/// flags carry the configured namespaces; SIGCHLD makes the child
/// waitable; stdio is inherited.
pub fn spawn_init(bundle: &Bundle, id: &str) -> Result<InitHandle> {
    let exe = cstring("/proc/self/exe")?;
    let argv = [
        cstring("corral")?,
        cstring("init")?,
        cstring("--bundle")?,
        cstring(&bundle.dir().to_string_lossy())?,
        cstring(id)?,
    ];
    let flags = bundle.clone_flags();
    debug!(id, ?flags, "spawning init process");

    let mut stack = vec![0u8; INIT_STACK_SIZE];
    // The callback runs in the cloned child: exec the init invocation,
    // or die with 127 so the supervisor sees a spawn failure.
    let child = {
        let cb = Box::new(|| -> isize {
            match execv(&exe, &argv) {
                Ok(_) => unreachable!(),
                Err(_) => 127,
            }
        });
        // SAFETY: the child callback only calls execv, which replaces
        // the process image without touching the shared address space.
        unsafe { clone(cb, &mut stack, flags, Some(libc::SIGCHLD)) }.map_err(|e| {
            Error::Launcher {
                phase: "clone".to_string(),
                source: e,
            }
        })?
    };

    // The start-time marker survives exec, so reading it right after
    // clone pins the identity even before the child pivots. A child
    // that died this early is a launcher failure, not a container.
    let start_time = match process::start_time(child.as_raw()) {
        Ok(t) => t,
        Err(e) => {
            warn!(id, pid = child.as_raw(), error = %e, "init died before identity capture");
            let _ = kill(child, Signal::SIGKILL);
            let _ = waitpid(child, None);
            return Err(Error::Launcher {
                phase: "record init identity".to_string(),
                source: nix::Error::ESRCH,
            });
        }
    };

    debug!(id, pid = child.as_raw(), start_time, "init process spawned");
    Ok(InitHandle {
        pid: child.as_raw(),
        start_time,
    })
}

/// Terminates a just-spawned init whose state could not be persisted.
pub fn abort_init(handle: InitHandle) {
    let pid = Pid::from_raw(handle.pid);
    let _ = kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, None);
}

/// Waits for the init process to exit and returns its exit status,
/// reporting signal termination as `128 + signo`.
pub fn wait_init(pid: i32) -> Result<i32> {
    loop {
        match waitpid(Pid::from_raw(pid), None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(128 + sig as i32),
            Ok(_) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(e) => {
                return Err(Error::Launcher {
                    phase: "wait for init".to_string(),
                    source: e,
                })
            }
        }
    }
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::Launcher {
        phase: format!("argument '{s}' contains an interior NUL"),
        source: nix::Error::EINVAL,
    })
}
