//! Constants for the container runtime.
//!
//! All paths, limits, and filenames are defined here to keep
//! the on-disk layout in one place.

// =============================================================================
// State Store Layout
// =============================================================================

/// Default root directory for container state (tmpfs on most systems).
pub const DEFAULT_STATE_ROOT: &str = "/run/corral";

/// State document filename inside a container's state directory.
pub const STATE_FILE: &str = "state.json";

/// Advisory lock filename inside a container's state directory.
pub const LOCK_FILE: &str = "lock";

/// OCI bundle configuration filename.
pub const CONFIG_FILE: &str = "config.json";

// =============================================================================
// Cgroup Layout
// =============================================================================

/// Base of the runtime-owned cgroup subtree (cgroup v2 unified hierarchy).
pub const CGROUP_BASE: &str = "/sys/fs/cgroup/corral";

// =============================================================================
// Limits
// =============================================================================

/// Maximum container id length (bytes).
pub const MAX_ID_LEN: usize = 1024;

// =============================================================================
// OCI Spec
// =============================================================================

/// OCI Runtime Spec version echoed in state output.
pub const OCI_RUNTIME_SPEC_VERSION: &str = "1.0.2";

/// PATH used to resolve the container program when the config env
/// does not carry one.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

// =============================================================================
// Validation
// =============================================================================

/// Validates a container id for use as a state directory name.
///
/// Ids key the state store, so anything that would escape or alias a
/// directory entry is rejected.
pub fn validate_container_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("must not be empty");
    }
    if id.len() > MAX_ID_LEN {
        return Err("exceeds maximum length of 1024");
    }
    if id.contains('/') {
        return Err("must not contain path separators");
    }
    if id == "." || id == ".." {
        return Err("must not be a relative path component");
    }
    Ok(())
}
