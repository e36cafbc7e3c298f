//! # corral
//!
//! **OCI-Compliant Container Runtime for Linux**
//!
//! This crate turns a filesystem bundle (rootfs + `config.json`) into an
//! isolated process tree under Linux namespaces, cgroups, and a pivoted
//! root, exposing the OCI runtime lifecycle verbs:
//!
//! ```text
//! corral create <id> --bundle <dir>
//! corral start <id>
//! corral state <id>
//! corral kill <id> [signal]
//! corral delete <id>
//! corral run <id> --bundle <dir>
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   ┌─────────┐   create   ┌─────────┐   start   ┌─────────┐
//!   │ (none)  │ ─────────► │ Created │ ────────► │ Running │
//!   └─────────┘            └─────────┘           └────┬────┘
//!                               │                     │ init exits / kill
//!                               │ delete              ▼
//!                               │                ┌─────────┐
//!                               ▼                │ Stopped │
//!                          ┌─────────┐  delete   └────┬────┘
//!                          │ Deleted │ ◄──────────────┘
//!                          └─────────┘
//! ```
//!
//! # Architecture
//!
//! The runtime is strictly invocation-scoped: each CLI command is a
//! short-lived synchronous process, and the only rendezvous between
//! invocations is the on-disk state store under `/run/corral` guarded by
//! per-container advisory locks.
//!
//! Starting a container is a two-process relay on a single binary. The
//! supervisor side clones a child into the requested namespaces; the
//! child re-execs this binary with the hidden `init` verb, pivots into
//! the bundle rootfs, mounts `/proc`, sets the hostname, and execs the
//! user program. The supervisor records the child's pid together with
//! its kernel start-time marker, and every later observation checks
//! that identity against `/proc` so a reused pid is never mistaken for
//! a live container.

mod bundle;
mod cgroup;
mod constants;
mod container;
mod error;
mod init;
mod launcher;
mod logging;
mod process;
mod signal;
mod state;
mod store;

pub use bundle::Bundle;
pub use cgroup::{CgroupManager, CgroupPolicy};
pub use constants::{validate_container_id, DEFAULT_STATE_ROOT, OCI_RUNTIME_SPEC_VERSION};
pub use container::{write_pid_file, Runtime};
pub use error::{Error, Result};
pub use logging::{init as init_logging, LogConfig};
pub use process::{is_alive, start_time, stat_start_time, stat_state};
pub use signal::parse_signal;
pub use state::{State, Status};
pub use store::{ContainerDir, LockGuard, StateStore};

/// Child-side container bring-up, exposed for the hidden `init` verb.
pub use init::run as init_container;
