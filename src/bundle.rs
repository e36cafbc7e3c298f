//! Bundle view: validated, immutable projection of an OCI bundle.
//!
//! Loads `config.json` through the `oci-spec` types, resolves the root
//! filesystem path against the bundle directory, and validates the
//! fields the lifecycle engine consumes. Validation is total: the whole
//! document is accepted, or the first error is returned and nothing is
//! exposed.
//!
//! The view is loaded fresh per invocation and never mutated.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sched::CloneFlags;
use oci_spec::runtime::{LinuxNamespaceType, LinuxResources, Spec};
use tracing::debug;

use crate::constants::{CONFIG_FILE, OCI_RUNTIME_SPEC_VERSION};
use crate::error::{Error, Result};

// =============================================================================
// Bundle View
// =============================================================================

/// Immutable view of the configuration fields the core reads.
#[derive(Debug, Clone)]
pub struct Bundle {
    dir: PathBuf,
    rootfs: PathBuf,
    oci_version: String,
    args: Vec<String>,
    env: Vec<String>,
    cwd: PathBuf,
    hostname: Option<String>,
    namespaces: Vec<LinuxNamespaceType>,
    annotations: HashMap<String, String>,
    resources: Option<LinuxResources>,
}

impl Bundle {
    /// Loads and validates `config.json` from a bundle directory.
    pub fn load(bundle: &Path) -> Result<Self> {
        let dir = fs::canonicalize(bundle)
            .map_err(|e| Error::InvalidConfig(format!("bundle {}: {}", bundle.display(), e)))?;
        let spec = Spec::load(dir.join(CONFIG_FILE))
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        debug!(bundle = %dir.display(), "loaded oci runtime config");

        let process = spec
            .process()
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("process is required".to_string()))?;

        let args = process.args().clone().unwrap_or_default();
        if args.is_empty() {
            return Err(Error::InvalidConfig(
                "process.args must not be empty".to_string(),
            ));
        }
        if args.iter().any(|a| a.is_empty()) {
            return Err(Error::InvalidConfig(
                "process.args entries must not be empty".to_string(),
            ));
        }

        let cwd = process.cwd().clone();
        if !cwd.is_absolute() {
            return Err(Error::InvalidConfig(format!(
                "process.cwd must be absolute, got '{}'",
                cwd.display()
            )));
        }

        let env = process.env().clone().unwrap_or_default();
        for entry in &env {
            if !entry.contains('=') {
                return Err(Error::InvalidConfig(format!(
                    "invalid environment entry '{entry}', expected KEY=VALUE"
                )));
            }
        }

        let root = spec
            .root()
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("root is required".to_string()))?;
        if root.path().as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "root.path must not be empty".to_string(),
            ));
        }
        let rootfs = if root.path().is_absolute() {
            root.path().clone()
        } else {
            dir.join(root.path())
        };
        if !rootfs.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "root filesystem does not exist: {}",
                rootfs.display()
            )));
        }

        let linux = spec
            .linux()
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("linux.namespaces is required".to_string()))?;
        let namespaces: Vec<LinuxNamespaceType> = linux
            .namespaces()
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("linux.namespaces is required".to_string()))?
            .iter()
            .map(|ns| ns.typ())
            .collect();
        for kind in &namespaces {
            if clone_flag(*kind).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "unsupported namespace type '{kind:?}'"
                )));
            }
        }

        if let Some(mounts) = spec.mounts() {
            for mount in mounts {
                if !mount.destination().is_absolute() {
                    return Err(Error::InvalidConfig(format!(
                        "mount destination must be absolute, got '{}'",
                        mount.destination().display()
                    )));
                }
                match mount.typ() {
                    Some(typ) if !typ.is_empty() => {}
                    _ => {
                        return Err(Error::InvalidConfig(format!(
                            "mount '{}' has no type",
                            mount.destination().display()
                        )))
                    }
                }
            }
        }

        let oci_version = if spec.version().is_empty() {
            OCI_RUNTIME_SPEC_VERSION.to_string()
        } else {
            spec.version().clone()
        };

        Ok(Self {
            rootfs,
            oci_version,
            args,
            env,
            cwd,
            hostname: spec.hostname().clone(),
            namespaces,
            annotations: spec.annotations().clone().unwrap_or_default(),
            resources: spec.linux().as_ref().and_then(|l| l.resources().clone()),
            dir,
        })
    }

    /// Absolute bundle directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute, existing root filesystem path.
    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    /// OCI version declared by the config.
    pub fn oci_version(&self) -> &str {
        &self.oci_version
    }

    /// argv for the user program; validated non-empty.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// `KEY=VALUE` environment for the exec.
    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// Absolute working directory applied after pivot.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Hostname for the UTS namespace, when configured.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Requested namespace kinds.
    pub fn namespaces(&self) -> &[LinuxNamespaceType] {
        &self.namespaces
    }

    /// Annotations, persisted verbatim into the state record.
    pub fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    /// Resource limits handed to the cgroup writer.
    pub fn resources(&self) -> Option<&LinuxResources> {
        self.resources.as_ref()
    }

    /// Combined clone flags for every configured namespace kind.
    pub fn clone_flags(&self) -> CloneFlags {
        self.namespaces
            .iter()
            .filter_map(|kind| clone_flag(*kind))
            .fold(CloneFlags::empty(), |acc, flag| acc | flag)
    }
}

/// Maps a namespace kind onto its clone flag. `None` marks kinds outside
/// the recognized set.
fn clone_flag(kind: LinuxNamespaceType) -> Option<CloneFlags> {
    match kind {
        LinuxNamespaceType::Mount => Some(CloneFlags::CLONE_NEWNS),
        LinuxNamespaceType::Uts => Some(CloneFlags::CLONE_NEWUTS),
        LinuxNamespaceType::Ipc => Some(CloneFlags::CLONE_NEWIPC),
        LinuxNamespaceType::Pid => Some(CloneFlags::CLONE_NEWPID),
        LinuxNamespaceType::Network => Some(CloneFlags::CLONE_NEWNET),
        LinuxNamespaceType::User => Some(CloneFlags::CLONE_NEWUSER),
        LinuxNamespaceType::Cgroup => Some(CloneFlags::CLONE_NEWCGROUP),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}
