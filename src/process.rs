//! Process identity and liveness probing.
//!
//! A recorded pid alone cannot identify an init process on a long-lived
//! host: pids are reused. Identity here is the pair of the pid and the
//! process start time from `/proc/<pid>/stat`, in kernel clock ticks
//! since boot. Start time is monotone within a boot, so a reused pid
//! always carries a later marker.
//!
//! Parsing note: the `comm` field in `stat` is the command name in
//! parentheses and may itself contain spaces and `)`. The only correct
//! split point is the *last* `)` in the line; everything after it is
//! whitespace-separated fields starting with the process state.

use std::fs;

use tracing::debug;

use crate::error::{Error, Result};

/// Offset of the start-time field (field 22 of `stat`) among the fields
/// following the comm delimiter, which begin at field 3.
const STARTTIME_INDEX: usize = 19;

// =============================================================================
// Stat Parsing
// =============================================================================

/// Extracts the fields after the last `)` of a stat line.
fn fields_after_comm(stat: &str) -> Result<Vec<&str>> {
    let idx = stat
        .rfind(')')
        .ok_or_else(|| invalid_stat("no comm delimiter"))?;
    Ok(stat[idx + 1..].split_ascii_whitespace().collect())
}

/// Parses the process state character (field 3) from a stat line.
pub fn stat_state(stat: &str) -> Result<char> {
    let fields = fields_after_comm(stat)?;
    fields
        .first()
        .and_then(|f| f.chars().next())
        .ok_or_else(|| invalid_stat("missing state field"))
}

/// Parses the start-time marker (field 22, clock ticks since boot) from
/// a stat line.
pub fn stat_start_time(stat: &str) -> Result<u64> {
    let fields = fields_after_comm(stat)?;
    fields
        .get(STARTTIME_INDEX)
        .ok_or_else(|| invalid_stat("missing starttime field"))?
        .parse()
        .map_err(|_| invalid_stat("starttime is not a number"))
}

fn invalid_stat(reason: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid /proc stat format: {reason}"),
    ))
}

// =============================================================================
// Liveness Probe
// =============================================================================

/// Reads the start-time marker of a live process.
pub fn start_time(pid: i32) -> Result<u64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat"))?;
    stat_start_time(&stat)
}

/// Decides whether the process recorded as `(pid, recorded_start_time)`
/// is still alive.
///
/// Dead when `/proc/<pid>` is gone, when the start-time marker differs
/// (pid reuse), or when the process state is zombie (`Z`) or dead (`X`).
/// Read and parse failures count as dead: refusing the observation would
/// keep the operator from cleaning up.
pub fn is_alive(pid: i32, recorded_start_time: u64) -> bool {
    if pid <= 0 {
        return false;
    }
    let stat = match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat,
        Err(e) => {
            debug!(pid, error = %e, "init process gone from /proc");
            return false;
        }
    };
    let current = match stat_start_time(&stat) {
        Ok(t) => t,
        Err(e) => {
            debug!(pid, error = %e, "unparseable stat, treating init as dead");
            return false;
        }
    };
    if current != recorded_start_time {
        debug!(
            pid,
            recorded = recorded_start_time,
            observed = current,
            "pid reused since start"
        );
        return false;
    }
    match stat_state(&stat) {
        Ok('Z') | Ok('X') => false,
        Ok(_) => true,
        Err(e) => {
            debug!(pid, error = %e, "unparseable stat, treating init as dead");
            false
        }
    }
}
