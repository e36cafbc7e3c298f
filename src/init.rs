//! Init launcher, child side.
//!
//! Runs inside the freshly created namespaces, invoked as the hidden
//! `init` verb. Brings the container up and replaces itself with the
//! user program:
//!
//! 1. make mount propagation private, then slave, so nothing leaks to
//!    the host mount table
//! 2. bind-mount the rootfs onto itself (pivot_root needs a mount point)
//! 3. pivot into the rootfs and detach the old root
//! 4. mount `/proc` (nosuid, noexec, nodev)
//! 5. set the hostname when configured
//! 6. enter the configured working directory
//! 7. resolve and exec the user program
//!
//! Every failure exits nonzero; the exec never returns on success.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chdir, execve, fchdir, pivot_root, sethostname};
use oci_spec::runtime::LinuxNamespaceType;
use tracing::{debug, warn};

use crate::bundle::Bundle;
use crate::constants::DEFAULT_PATH;
use crate::error::{Error, Result};

/// Performs the post-namespace bring-up and execs the user program.
///
/// Only returns on failure; the `Infallible` success type documents
/// that a successful exec never comes back.
pub fn run(bundle_path: &Path, id: &str) -> Result<Infallible> {
    let bundle = Bundle::load(bundle_path)?;
    debug!(id, rootfs = %bundle.rootfs().display(), "bringing up container init");

    setup_rootfs(bundle.rootfs())?;
    mount_proc()?;

    // Without a UTS namespace the hostname would escape to the host.
    if let Some(hostname) = bundle.hostname() {
        if bundle.namespaces().contains(&LinuxNamespaceType::Uts) {
            sethostname(hostname).map_err(|e| launcher("set hostname", e))?;
        } else {
            warn!(hostname, "hostname configured without a uts namespace, skipping");
        }
    }

    chdir(bundle.cwd()).map_err(|e| launcher("enter working directory", e))?;

    let program = resolve_executable(&bundle.args()[0], bundle.env())?;
    exec(&program, bundle.args(), bundle.env())
}

// =============================================================================
// Root Filesystem
// =============================================================================

/// Reparents the mount namespace onto the bundle rootfs via pivot_root.
fn setup_rootfs(rootfs: &Path) -> Result<()> {
    // Stop propagation to the host first: private cuts both directions,
    // then slave keeps host-side mounts visible without leaking ours.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| launcher("make / private", e))?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| launcher("make / slave", e))?;

    // pivot_root requires the new root to be a mount point.
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| launcher("bind-mount rootfs", e))?;

    chdir(rootfs).map_err(|e| launcher("enter rootfs", e))?;

    let oldroot = open_dir(Path::new("/"))?;
    let newroot = open_dir(rootfs)?;

    // pivot_root(".", ".") stacks the old root beneath the new one; the
    // saved fd lets us get back to the old root to detach it.
    fchdir(newroot.as_raw_fd()).map_err(|e| launcher("enter new root", e))?;
    pivot_root(".", ".").map_err(|e| launcher("pivot_root", e))?;
    fchdir(oldroot.as_raw_fd()).map_err(|e| launcher("re-enter old root", e))?;
    mount(
        None::<&str>,
        ".",
        None::<&str>,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| launcher("make old root slave", e))?;
    umount2(".", MntFlags::MNT_DETACH).map_err(|e| launcher("detach old root", e))?;
    chdir("/").map_err(|e| launcher("enter pivoted root", e))?;

    Ok(())
}

fn mount_proc() -> Result<()> {
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| launcher("mount proc", e))
}

fn open_dir(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(path)
        .map_err(Error::Io)
}

// =============================================================================
// Program Resolution & Exec
// =============================================================================

/// Resolves the program to exec, relative to the pivoted root:
/// an absolute `args[0]` is taken as-is, otherwise the container root
/// is tried first, then the PATH from the config environment.
fn resolve_executable(arg0: &str, env: &[String]) -> Result<PathBuf> {
    let candidate = Path::new(arg0);
    if candidate.is_absolute() {
        return Ok(candidate.to_path_buf());
    }

    let in_root = Path::new("/").join(candidate);
    if is_executable(&in_root) {
        return Ok(in_root);
    }

    let path_var = env
        .iter()
        .find_map(|e| e.strip_prefix("PATH="))
        .unwrap_or(DEFAULT_PATH);
    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(arg0);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    Err(Error::ExecutableNotFound(arg0.to_string()))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Replaces the process image with the user program. A returned exec is
/// itself the failure.
fn exec(program: &Path, args: &[String], env: &[String]) -> Result<Infallible> {
    let program = cstring(&program.to_string_lossy())?;
    let args: Vec<CString> = args.iter().map(|a| cstring(a)).collect::<Result<_>>()?;
    let env: Vec<CString> = env.iter().map(|e| cstring(e)).collect::<Result<_>>()?;

    execve(&program, &args, &env).map_err(|e| launcher("exec user program", e))
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::InvalidConfig(format!("'{s}' contains an interior NUL")))
}

fn launcher(phase: &str, source: nix::Error) -> Error {
    Error::Launcher {
        phase: phase.to_string(),
        source,
    }
}
