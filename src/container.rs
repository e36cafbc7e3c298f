//! Container controller: the OCI lifecycle state machine.
//!
//! Orchestrates the verbs, enforcing the state machine, persisting
//! transitions through the state store, and reconciling recorded state
//! against kernel reality via the liveness probe. Every read-modify-write
//! verb holds the container's exclusive lock for its whole window, so
//! concurrent CLI invocations serialize per container.

use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::bundle::Bundle;
use crate::cgroup::{CgroupManager, CgroupPolicy};
use crate::constants::validate_container_id;
use crate::error::{Error, Result};
use crate::launcher;
use crate::process;
use crate::state::{State, Status};
use crate::store::{ContainerDir, StateStore};

// =============================================================================
// Runtime
// =============================================================================

/// Invocation-scoped handle on a state root; the entry point for every
/// lifecycle verb.
pub struct Runtime {
    store: StateStore,
    cgroups: CgroupManager,
}

impl Runtime {
    /// Opens the runtime against a state root, creating it if needed.
    pub fn new(root: impl Into<PathBuf>, policy: CgroupPolicy) -> Result<Self> {
        Ok(Self {
            store: StateStore::new(root)?,
            cgroups: CgroupManager::new(policy),
        })
    }

    /// Access to the underlying state store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // =========================================================================
    // create
    // =========================================================================

    /// Creates a container from a bundle. No process is started.
    pub fn create(&self, id: &str, bundle: &Path) -> Result<State> {
        validate_container_id(id).map_err(|reason| Error::InvalidId {
            id: id.to_string(),
            reason,
        })?;

        let bundle = fs::canonicalize(bundle)
            .map_err(|e| Error::InvalidConfig(format!("bundle {}: {}", bundle.display(), e)))?;
        let view = Bundle::load(&bundle)?;

        let dir = match self.store.create(id) {
            Ok(dir) => dir,
            Err(Error::AlreadyExists(_)) => self.reclaim_orphaned_create(id)?,
            Err(e) => return Err(e),
        };

        // From here on the directory exists; any failure must take it
        // back down so a failed create leaves nothing behind.
        let result = self.write_initial_state(&dir, id, &bundle, &view);
        if result.is_err() {
            if let Err(e) = dir.destroy() {
                warn!(id, error = %e, "failed to roll back state directory");
            }
        }
        result
    }

    fn write_initial_state(
        &self,
        dir: &ContainerDir,
        id: &str,
        bundle: &Path,
        view: &Bundle,
    ) -> Result<State> {
        let _lock = dir.lock()?;
        let mut state = State::new(
            id,
            bundle.to_string_lossy(),
            view.oci_version(),
            view.annotations().clone(),
        );
        dir.save(&state)?;

        state.status = Status::Created;
        dir.save(&state)?;
        info!(id, bundle = %bundle.display(), "created container");
        Ok(state)
    }

    /// A directory whose record is stuck at `creating` is the residue
    /// of a crashed create; reclaim it for the new one. The decision is
    /// taken under the container lock so a create that is merely in
    /// flight (which holds the lock across its writes) is never
    /// mistaken for residue.
    fn reclaim_orphaned_create(&self, id: &str) -> Result<ContainerDir> {
        let existing = self.store.open(id)?;
        let _lock = existing.lock()?;
        match existing.load() {
            Ok(state) if state.status == Status::Creating => {
                debug!(id, "reclaiming state directory from interrupted create");
                existing.destroy()?;
                self.store.create(id)
            }
            Ok(_) => Err(Error::AlreadyExists(id.to_string())),
            // A directory without a record belongs to a create that has
            // not reached its marker yet; treat it as the duplicate it
            // is about to become.
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::AlreadyExists(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // start
    // =========================================================================

    /// Starts a created container: spawns the init process and records
    /// its identity. On launcher failure the container stays `created`.
    pub fn start(&self, id: &str) -> Result<State> {
        let dir = self.store.open(id)?;
        let _lock = dir.lock()?;
        let mut state = self.load_settled(&dir)?;

        if state.status != Status::Created {
            return Err(Error::InvalidState {
                id: id.to_string(),
                state: state.status,
                expected: "created",
            });
        }

        // Re-validate against the live bundle; the config may have
        // changed since create.
        let view = Bundle::load(Path::new(&state.bundle))?;

        let handle = launcher::spawn_init(&view, id)?;

        if let Err(e) = self.cgroups.setup(id, view.resources(), handle.pid) {
            launcher::abort_init(handle);
            return Err(e);
        }

        state.mark_running(handle.pid, handle.start_time);
        if let Err(e) = dir.save(&state) {
            // The record cannot reflect the spawn; do not leak the init.
            launcher::abort_init(handle);
            return Err(e);
        }

        info!(id, pid = handle.pid, "started container");
        Ok(state)
    }

    // =========================================================================
    // state
    // =========================================================================

    /// Reports the container's state, reconciled against the kernel:
    /// a recorded `running` whose init is gone is downgraded to
    /// `stopped` and persisted before being returned.
    pub fn state(&self, id: &str) -> Result<State> {
        let dir = self.store.open(id)?;
        let _lock = dir.lock()?;
        let mut state = self.load_settled(&dir)?;

        if state.status == Status::Running
            && !process::is_alive(state.pid, state.init_process_start_time)
        {
            debug!(id, pid = state.pid, "init process gone, downgrading to stopped");
            state.mark_stopped(None);
            dir.save(&state)?;
        }

        Ok(state)
    }

    // =========================================================================
    // kill
    // =========================================================================

    /// Sends a signal to the init process. Fire-and-forget: the status
    /// is not changed synchronously; a later `state` observes the
    /// outcome through the liveness probe.
    pub fn kill(&self, id: &str, signal: Signal) -> Result<()> {
        let dir = self.store.open(id)?;
        let _lock = dir.lock()?;
        let mut state = self.load_settled(&dir)?;

        match state.status {
            Status::Created => Err(Error::NoProcess(id.to_string())),
            Status::Running => {
                if !process::is_alive(state.pid, state.init_process_start_time) {
                    state.mark_stopped(None);
                    dir.save(&state)?;
                    return Err(Error::InvalidState {
                        id: id.to_string(),
                        state: Status::Stopped,
                        expected: "created or running",
                    });
                }
                kill(Pid::from_raw(state.pid), signal)?;
                info!(id, pid = state.pid, %signal, "signalled container");
                Ok(())
            }
            status => Err(Error::InvalidState {
                id: id.to_string(),
                state: status,
                expected: "created or running",
            }),
        }
    }

    // =========================================================================
    // delete
    // =========================================================================

    /// Removes the container's state. Fails with `Busy` while the init
    /// process is alive; idempotent when the container is already gone.
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = match self.store.open(id) {
            Ok(dir) => dir,
            Err(Error::NotFound(_)) => {
                debug!(id, "delete of absent container is a no-op");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let _lock = dir.lock()?;

        match dir.load() {
            Ok(mut state) => {
                if state.status == Status::Running {
                    if process::is_alive(state.pid, state.init_process_start_time) {
                        return Err(Error::Busy(id.to_string()));
                    }
                    state.mark_stopped(None);
                    dir.save(&state)?;
                }
            }
            // A directory without a readable record is create residue;
            // removal is the recovery.
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(Error::Corrupt { .. }) => {
                warn!(id, "removing container with corrupt state");
            }
            Err(e) => return Err(e),
        }

        self.cgroups.remove(id);
        dir.destroy()?;
        info!(id, "deleted container");
        Ok(())
    }

    // =========================================================================
    // run
    // =========================================================================

    /// `create` + `start` + foreground wait. The final `stopped` state
    /// is persisted with the real exit status but not deleted.
    pub fn run(&self, id: &str, bundle: &Path) -> Result<State> {
        self.create(id, bundle)?;
        let state = self.start(id)?;

        let exit_status = launcher::wait_init(state.pid)?;
        debug!(id, exit_status, "init process exited");

        let dir = self.store.open(id)?;
        let _lock = dir.lock()?;
        let mut state = dir.load()?;
        state.mark_stopped(Some(exit_status));
        dir.save(&state)?;
        info!(id, exit_status, "container finished");
        Ok(state)
    }

    // =========================================================================
    // list
    // =========================================================================

    /// States of all registered containers, each reconciled like
    /// `state`. Unreadable entries are skipped.
    pub fn list(&self) -> Result<Vec<State>> {
        let mut states = Vec::new();
        for id in self.store.containers()? {
            match self.state(&id) {
                Ok(state) => states.push(state),
                Err(e) => debug!(id = %id, error = %e, "skipping unreadable container"),
            }
        }
        Ok(states)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Loads the record, rejecting containers whose create never
    /// finished: they are not observable through the verbs.
    fn load_settled(&self, dir: &ContainerDir) -> Result<State> {
        let state = dir.load()?;
        if state.status == Status::Creating {
            return Err(Error::NotFound(dir.id().to_string()));
        }
        Ok(state)
    }
}

/// Writes the recorded init pid to a pid file, for callers that manage
/// the container from the outside.
pub fn write_pid_file(path: &Path, pid: i32) -> Result<()> {
    fs::write(path, pid.to_string())?;
    Ok(())
}
