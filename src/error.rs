//! Error types for the container lifecycle engine.

use crate::state::Status;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Container Lifecycle Errors
    // =========================================================================
    /// Container not found.
    #[error("container not found: {0}")]
    NotFound(String),

    /// Container already exists.
    #[error("container already exists: {0}")]
    AlreadyExists(String),

    /// Container id is not usable as a state directory name.
    #[error("invalid container id '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// Verb applied in a state that forbids it.
    #[error("container '{id}' is {state}, expected {expected}")]
    InvalidState {
        id: String,
        state: Status,
        expected: &'static str,
    },

    /// Signal requested before any init process exists.
    #[error("container '{0}' has no process to signal")]
    NoProcess(String),

    /// Delete requested while the init process is still alive.
    #[error("cannot delete running container '{0}'")]
    Busy(String),

    // =========================================================================
    // Bundle / Config Errors
    // =========================================================================
    /// Schema or semantic validation of config.json failed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Launcher Errors
    // =========================================================================
    /// Spawn, namespace, pivot, mount, or exec failure.
    #[error("launcher failed: {phase}: {source}")]
    Launcher {
        phase: String,
        #[source]
        source: nix::Error,
    },

    /// The configured program could not be resolved inside the container.
    #[error("executable '{0}' not found in container root or PATH")]
    ExecutableNotFound(String),

    /// Cgroup placement failed under strict policy.
    #[error("cgroup setup failed: {0}")]
    Cgroup(String),

    // =========================================================================
    // State Store Errors
    // =========================================================================
    /// The state file exists but does not parse.
    #[error("corrupt state for container '{id}': {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    // =========================================================================
    // CLI Errors
    // =========================================================================
    /// Signal name or number not recognized.
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    /// Log format flag not recognized.
    #[error("invalid log format '{0}', expected 'text' or 'json'")]
    InvalidLogFormat(String),

    // =========================================================================
    // OS Errors
    // =========================================================================
    /// State store read/write/lock failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other OS-level failure.
    #[error("OS error: {0}")]
    Os(#[from] nix::Error),
}
