//! On-disk state store.
//!
//! One directory per container under a root path, holding the state
//! document and a lock file:
//!
//! ```text
//! <root>/                 mode 0700
//! └── <id>/               mode 0711
//!     ├── state.json      written via temp file + fsync + rename
//!     └── lock            advisory flock(2) target
//! ```
//!
//! The store is the sole rendezvous between CLI invocations. Mutating
//! verbs take the exclusive lock, re-read the state, validate the
//! transition, and write; readers never observe a partial document
//! because writes land by rename.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::constants::{LOCK_FILE, STATE_FILE};
use crate::error::{Error, Result};
use crate::state::State;

// =============================================================================
// State Store
// =============================================================================

/// Handle on the state root directory shared by all containers.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Opens the store, creating the root directory (mode 0700) if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&root)?;
        Ok(Self { root })
    }

    /// Returns the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a new container directory (mode 0711).
    ///
    /// Uses `mkdir` atomicity to arbitrate concurrent creates: the loser
    /// observes `EEXIST` and gets `AlreadyExists`.
    pub fn create(&self, id: &str) -> Result<ContainerDir> {
        let path = self.root.join(id);
        match DirBuilder::new().mode(0o711).create(&path) {
            Ok(()) => Ok(ContainerDir {
                id: id.to_string(),
                path,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::AlreadyExists(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Opens an existing container directory.
    pub fn open(&self, id: &str) -> Result<ContainerDir> {
        let path = self.root.join(id);
        if !path.is_dir() {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(ContainerDir {
            id: id.to_string(),
            path,
        })
    }

    /// Lists the ids of all registered containers.
    pub fn containers(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// =============================================================================
// Container Directory
// =============================================================================

/// Handle on one container's state directory.
#[derive(Debug, Clone)]
pub struct ContainerDir {
    id: String,
    path: PathBuf,
}

impl ContainerDir {
    /// Container id; equals the directory name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the state directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state_path(&self) -> PathBuf {
        self.path.join(STATE_FILE)
    }

    /// Parses the state document.
    ///
    /// A missing file surfaces as `Io` (the directory exists but create
    /// never finished); malformed JSON surfaces as `Corrupt`.
    pub fn load(&self) -> Result<State> {
        let data = fs::read_to_string(self.state_path())?;
        serde_json::from_str(&data).map_err(|e| Error::Corrupt {
            id: self.id.clone(),
            source: e,
        })
    }

    /// Persists the state document atomically: write a temp file in the
    /// same directory, fsync, then rename over the live document.
    pub fn save(&self, state: &State) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.join(format!("{STATE_FILE}.tmp"));
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, self.state_path())?;
        Ok(())
    }

    /// Takes the advisory exclusive lock, blocking until it is free.
    /// The lock is released when the returned guard drops.
    pub fn lock(&self) -> Result<LockGuard> {
        let file = self.lock_file()?;
        match Flock::lock(file, FlockArg::LockExclusive) {
            Ok(lock) => Ok(LockGuard { _lock: lock }),
            Err((_, errno)) => Err(Error::Os(errno)),
        }
    }

    /// Attempts the exclusive lock without blocking. Returns `None` when
    /// another invocation holds it.
    pub fn try_lock(&self) -> Result<Option<LockGuard>> {
        let file = self.lock_file()?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(LockGuard { _lock: lock })),
            Err((_, nix::Error::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(Error::Os(errno)),
        }
    }

    fn lock_file(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.path.join(LOCK_FILE))?)
    }

    /// Removes the state directory and everything in it. Idempotent when
    /// the directory is already gone.
    pub fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(id = %self.id, "state directory already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Advisory exclusive lock on a container directory; unlocks on drop.
pub struct LockGuard {
    _lock: Flock<File>,
}
