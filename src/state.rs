//! Container state record and status.
//!
//! One JSON document per container, persisted by the state store and
//! mutated only under the per-container lock. The document shape follows
//! the OCI Runtime Spec state schema, extended with the init process
//! start-time marker used for pid-reuse detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Container Status
// =============================================================================

/// OCI Runtime Spec container status.
///
/// `Creating` is a transient on-disk marker that makes `create`
/// crash-safe; it is never reported by the `state` verb.
///
/// ```text
///         create              start                 init exits / kill
///   ∅ ─────────────▶ created ─────────▶ running ───────────────────▶ stopped
///                      │                                               │
///                      └──────────────── delete ───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Create has started but the full record is not yet on disk.
    Creating,
    /// Container exists, no process started.
    Created,
    /// Init process spawned and believed alive.
    Running,
    /// Init process has exited.
    Stopped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// =============================================================================
// State Record
// =============================================================================

/// Durable per-container state.
///
/// Invariants enforced by the controller:
/// - `Running` implies `pid > 0` and `init_process_start_time != 0`.
/// - `Created` implies `pid == 0`.
/// - Once `Stopped`, only `finished`, `exit_status`, and `status` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// OCI version of the state schema.
    pub oci_version: String,
    /// Container id; equals the state directory name.
    pub id: String,
    /// Container status.
    pub status: Status,
    /// Init process id; 0 until `start`, never cleared afterward.
    pub pid: i32,
    /// Absolute path to the bundle directory, captured at create.
    pub bundle: String,
    /// Kernel start-time marker of the init process, in clock ticks
    /// since boot; 0 until `start`.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub init_process_start_time: u64,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Start timestamp, present once `start` succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// Termination timestamp, present once the init exit is observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    /// Init exit status when learnable (foreground `run` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    /// Annotations copied verbatim from the bundle config.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl State {
    /// Builds the initial `Creating` record written right after the
    /// state directory is made.
    pub fn new(
        id: impl Into<String>,
        bundle: impl Into<String>,
        oci_version: impl Into<String>,
        annotations: HashMap<String, String>,
    ) -> Self {
        Self {
            oci_version: oci_version.into(),
            id: id.into(),
            status: Status::Creating,
            pid: 0,
            bundle: bundle.into(),
            init_process_start_time: 0,
            created: Utc::now(),
            started: None,
            finished: None,
            exit_status: None,
            annotations,
        }
    }

    /// Records a successful `start` transition.
    pub fn mark_running(&mut self, pid: i32, start_time: u64) {
        self.status = Status::Running;
        self.pid = pid;
        self.init_process_start_time = start_time;
        self.started = Some(Utc::now());
    }

    /// Records init termination. The pid and start marker are kept so
    /// later observations remain attributable.
    pub fn mark_stopped(&mut self, exit_status: Option<i32>) {
        self.status = Status::Stopped;
        self.finished = Some(Utc::now());
        if exit_status.is_some() {
            self.exit_status = exit_status;
        }
    }
}
