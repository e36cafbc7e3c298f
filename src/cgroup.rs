//! Cgroup writer: the launcher's resource-placement extension point.
//!
//! Writes the container's resource limits into a runtime-owned cgroup v2
//! subtree and attaches the init pid. Rootless invocations routinely lack
//! write access to the unified hierarchy, so placement runs under an
//! explicit policy: best-effort demotes failures to warnings, strict
//! fails the start. The lifecycle engine only requires the chosen policy
//! to be deterministic.

use std::fs;
use std::path::PathBuf;

use oci_spec::runtime::LinuxResources;
use tracing::{debug, warn};

use crate::constants::CGROUP_BASE;
use crate::error::{Error, Result};

// =============================================================================
// Policy
// =============================================================================

/// Failure policy for cgroup writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupPolicy {
    /// Cgroup failures fail the start.
    Strict,
    /// Cgroup failures are logged and ignored.
    BestEffort,
}

impl CgroupPolicy {
    /// Maps the `--rootless auto|true|false` flag onto a policy.
    /// `auto` selects best-effort for non-root invokers.
    pub fn from_rootless_flag(flag: &str) -> Result<Self> {
        match flag {
            "true" => Ok(Self::BestEffort),
            "false" => Ok(Self::Strict),
            "auto" => {
                if nix::unistd::geteuid().is_root() {
                    Ok(Self::Strict)
                } else {
                    Ok(Self::BestEffort)
                }
            }
            other => Err(Error::InvalidConfig(format!(
                "invalid rootless value '{other}', expected 'auto', 'true', or 'false'"
            ))),
        }
    }
}

// =============================================================================
// Cgroup Manager
// =============================================================================

/// Per-container cgroup directory manager.
#[derive(Debug, Clone)]
pub struct CgroupManager {
    base: PathBuf,
    policy: CgroupPolicy,
}

impl CgroupManager {
    /// Creates a manager rooted at the default runtime subtree.
    pub fn new(policy: CgroupPolicy) -> Self {
        Self::with_base(PathBuf::from(CGROUP_BASE), policy)
    }

    /// Creates a manager with a custom base directory.
    pub fn with_base(base: PathBuf, policy: CgroupPolicy) -> Self {
        Self { base, policy }
    }

    /// Creates the container's cgroup, applies the config's limits, and
    /// attaches the init pid via `cgroup.procs`.
    pub fn setup(&self, id: &str, resources: Option<&LinuxResources>, pid: i32) -> Result<()> {
        match self.try_setup(id, resources, pid) {
            Ok(()) => Ok(()),
            Err(e) => match self.policy {
                CgroupPolicy::Strict => Err(Error::Cgroup(e.to_string())),
                CgroupPolicy::BestEffort => {
                    warn!(id, error = %e, "cgroup setup failed, continuing without limits");
                    Ok(())
                }
            },
        }
    }

    fn try_setup(
        &self,
        id: &str,
        resources: Option<&LinuxResources>,
        pid: i32,
    ) -> std::io::Result<()> {
        let dir = self.base.join(id);
        fs::create_dir_all(&dir)?;

        if let Some(resources) = resources {
            if let Some(memory) = resources.memory() {
                if let Some(limit) = memory.limit() {
                    fs::write(dir.join("memory.max"), limit.to_string())?;
                }
            }
            if let Some(pids) = resources.pids() {
                fs::write(dir.join("pids.max"), pids.limit().to_string())?;
            }
            if let Some(cpu) = resources.cpu() {
                if let Some(shares) = cpu.shares() {
                    // The config does not bound shares; clamp to the v1
                    // range [2, 262144] before mapping onto the v2
                    // weight range [1, 10000], so an arbitrary u64
                    // cannot overflow the multiply.
                    let shares = shares.clamp(2, 262_144);
                    let weight = 1 + (shares - 2) * 9999 / 262_142;
                    fs::write(dir.join("cpu.weight"), weight.to_string())?;
                }
            }
        }

        fs::write(dir.join("cgroup.procs"), pid.to_string())?;
        debug!(id, pid, cgroup = %dir.display(), "placed init process in cgroup");
        Ok(())
    }

    /// Removes the container's cgroup directory. Cleanup is always
    /// best-effort: a busy or missing cgroup only logs.
    pub fn remove(&self, id: &str) {
        let dir = self.base.join(id);
        match fs::remove_dir(&dir) {
            Ok(()) => debug!(id, "removed cgroup"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(id, error = %e, "failed to remove cgroup"),
        }
    }
}
