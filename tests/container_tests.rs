//! Tests for the container controller.
//!
//! Drives the lifecycle verbs against a temp state root. Spawning real
//! namespaced init processes needs privileges the test environment may
//! not have, so `running` containers are fabricated by writing state
//! records that point at real host processes (this test process for a
//! live init, an already-reaped child for a dead one).

use std::collections::HashMap;
use std::path::Path;

use corral::{CgroupPolicy, Error, Runtime, State, StateStore, Status};
use nix::sys::signal::Signal;
use serde_json::json;
use tempfile::TempDir;

struct Harness {
    _temp: TempDir,
    runtime: Runtime,
    store: StateStore,
    bundle: TempDir,
}

fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("run");
    let runtime = Runtime::new(&root, CgroupPolicy::BestEffort).unwrap();
    let store = StateStore::new(&root).unwrap();
    Harness {
        _temp: temp,
        runtime,
        store,
        bundle: make_bundle(),
    }
}

fn make_bundle() -> TempDir {
    let bundle = TempDir::new().unwrap();
    std::fs::create_dir(bundle.path().join("rootfs")).unwrap();
    let config = json!({
        "ociVersion": "1.0.2",
        "process": {
            "user": {"uid": 0, "gid": 0},
            "args": ["/bin/sleep", "30"],
            "env": ["PATH=/usr/bin:/bin"],
            "cwd": "/"
        },
        "root": {"path": "rootfs"},
        "linux": {"namespaces": [{"type": "pid"}, {"type": "mount"}]}
    });
    std::fs::write(
        bundle.path().join("config.json"),
        serde_json::to_vec(&config).unwrap(),
    )
    .unwrap();
    bundle
}

/// Overwrites a container's record with a `running` state pointing at
/// the given process identity.
fn fake_running(store: &StateStore, id: &str, pid: i32, start_time: u64) {
    let dir = store.open(id).unwrap();
    let mut state = dir.load().unwrap();
    state.mark_running(pid, start_time);
    dir.save(&state).unwrap();
}

/// Identity of this test process: guaranteed alive.
fn live_identity() -> (i32, u64) {
    let pid = std::process::id() as i32;
    (pid, corral::start_time(pid).unwrap())
}

/// Identity of a child that has already exited and been reaped: its pid
/// is either unused or reused with a different start time, so the probe
/// must call it dead either way.
fn dead_identity() -> (i32, u64) {
    let mut child = std::process::Command::new("sh")
        .arg("-c")
        .arg("exit 0")
        .spawn()
        .unwrap();
    let pid = child.id() as i32;
    let start_time = corral::start_time(pid).unwrap();
    child.wait().unwrap();
    (pid, start_time)
}

// =============================================================================
// create
// =============================================================================

#[test]
fn create_produces_created_state_with_no_pid() {
    let h = harness();
    let state = h.runtime.create("web", h.bundle.path()).unwrap();

    assert_eq!(state.status, Status::Created);
    assert_eq!(state.pid, 0);
    assert_eq!(state.init_process_start_time, 0);

    let observed = h.runtime.state("web").unwrap();
    assert_eq!(observed.status, Status::Created);
    assert_eq!(observed.pid, 0);
}

#[test]
fn create_rejects_invalid_ids() {
    let h = harness();
    for id in ["", "a/b", ".", ".."] {
        assert!(
            matches!(
                h.runtime.create(id, h.bundle.path()),
                Err(Error::InvalidId { .. })
            ),
            "id {id:?} should be rejected"
        );
    }
    let too_long = "x".repeat(1025);
    assert!(matches!(
        h.runtime.create(&too_long, h.bundle.path()),
        Err(Error::InvalidId { .. })
    ));
}

#[test]
fn duplicate_create_fails_and_leaves_original_untouched() {
    let h = harness();
    let original = h.runtime.create("web", h.bundle.path()).unwrap();

    assert!(matches!(
        h.runtime.create("web", h.bundle.path()),
        Err(Error::AlreadyExists(_))
    ));

    let after = h.runtime.state("web").unwrap();
    assert_eq!(after.created, original.created);
    assert_eq!(after.status, Status::Created);
}

#[test]
fn failed_create_leaves_no_directory() {
    let h = harness();
    let bad_bundle = TempDir::new().unwrap(); // no config.json, no rootfs

    assert!(h.runtime.create("web", bad_bundle.path()).is_err());
    assert!(matches!(
        h.runtime.state("web"),
        Err(Error::NotFound(_))
    ));
    assert!(h.store.containers().unwrap().is_empty());
}

#[test]
fn interrupted_create_is_reclaimed_by_the_next_create() {
    let h = harness();

    // Simulate a crash between mkdir and the `created` write.
    let dir = h.store.create("web").unwrap();
    let state = State::new("web", "/gone", "1.0.2", HashMap::new());
    dir.save(&state).unwrap();
    assert_eq!(dir.load().unwrap().status, Status::Creating);

    let recreated = h.runtime.create("web", h.bundle.path()).unwrap();
    assert_eq!(recreated.status, Status::Created);
    assert_eq!(
        recreated.bundle,
        h.bundle.path().canonicalize().unwrap().to_string_lossy()
    );
}

#[test]
fn unfinished_create_is_invisible_to_observation() {
    let h = harness();
    let dir = h.store.create("web").unwrap();
    dir.save(&State::new("web", "/gone", "1.0.2", HashMap::new()))
        .unwrap();

    assert!(matches!(h.runtime.state("web"), Err(Error::NotFound(_))));
}

// =============================================================================
// start (state machine checks; real spawns need privileges)
// =============================================================================

#[test]
fn start_requires_created() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = live_identity();
    fake_running(&h.store, "web", pid, start_time);

    match h.runtime.start("web") {
        Err(Error::InvalidState { state, .. }) => assert_eq!(state, Status::Running),
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[test]
fn start_on_stopped_is_invalid_state() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = dead_identity();
    fake_running(&h.store, "web", pid, start_time);
    assert_eq!(h.runtime.state("web").unwrap().status, Status::Stopped);

    match h.runtime.start("web") {
        Err(Error::InvalidState { state, .. }) => assert_eq!(state, Status::Stopped),
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[test]
fn start_of_missing_container_is_not_found() {
    let h = harness();
    assert!(matches!(h.runtime.start("ghost"), Err(Error::NotFound(_))));
}

// =============================================================================
// state + liveness reconciliation
// =============================================================================

#[test]
fn state_downgrades_running_when_init_is_gone() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = dead_identity();
    fake_running(&h.store, "web", pid, start_time);

    let observed = h.runtime.state("web").unwrap();
    assert_eq!(observed.status, Status::Stopped);
    assert!(observed.finished.is_some());
    assert_eq!(observed.exit_status, None, "exit status is unlearnable");
    // The downgrade is persisted, not just reported.
    let dir = h.store.open("web").unwrap();
    assert_eq!(dir.load().unwrap().status, Status::Stopped);
}

#[test]
fn state_detects_pid_reuse_via_start_time() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    // A live pid recorded with a mismatched start-time marker is a
    // reused pid, not our init.
    let (pid, start_time) = live_identity();
    fake_running(&h.store, "web", pid, start_time + 1);

    assert_eq!(h.runtime.state("web").unwrap().status, Status::Stopped);
}

#[test]
fn state_keeps_running_while_init_is_alive() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = live_identity();
    fake_running(&h.store, "web", pid, start_time);

    let observed = h.runtime.state("web").unwrap();
    assert_eq!(observed.status, Status::Running);
    assert_eq!(observed.pid, pid);
}

#[test]
fn stopped_observations_are_monotone() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = dead_identity();
    fake_running(&h.store, "web", pid, start_time);

    assert_eq!(h.runtime.state("web").unwrap().status, Status::Stopped);
    assert_eq!(h.runtime.state("web").unwrap().status, Status::Stopped);
}

// =============================================================================
// kill
// =============================================================================

#[test]
fn kill_on_created_is_no_process() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();
    assert!(matches!(
        h.runtime.kill("web", Signal::SIGTERM),
        Err(Error::NoProcess(_))
    ));
}

#[test]
fn kill_on_stopped_is_invalid_state() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = dead_identity();
    fake_running(&h.store, "web", pid, start_time);
    h.runtime.state("web").unwrap();

    assert!(matches!(
        h.runtime.kill("web", Signal::SIGKILL),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn kill_downgrades_when_init_died_unobserved() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = dead_identity();
    fake_running(&h.store, "web", pid, start_time);

    // kill discovers the death itself.
    assert!(matches!(
        h.runtime.kill("web", Signal::SIGTERM),
        Err(Error::InvalidState { .. })
    ));
    let dir = h.store.open("web").unwrap();
    assert_eq!(dir.load().unwrap().status, Status::Stopped);
}

#[test]
fn kill_delivers_to_live_init() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    // Spawn a sleeping child and record it as the init process.
    let mut child = std::process::Command::new("sh")
        .arg("-c")
        .arg("sleep 30")
        .spawn()
        .unwrap();
    let pid = child.id() as i32;
    let start_time = corral::start_time(pid).unwrap();
    fake_running(&h.store, "web", pid, start_time);

    h.runtime.kill("web", Signal::SIGKILL).unwrap();
    let status = child.wait().unwrap();
    assert!(!status.success());

    // After the reap, observation settles on stopped.
    assert_eq!(h.runtime.state("web").unwrap().status, Status::Stopped);
}

// =============================================================================
// delete
// =============================================================================

#[test]
fn delete_running_is_busy() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = live_identity();
    fake_running(&h.store, "web", pid, start_time);

    assert!(matches!(h.runtime.delete("web"), Err(Error::Busy(_))));
    // Still there.
    assert_eq!(h.runtime.state("web").unwrap().status, Status::Running);
}

#[test]
fn delete_created_succeeds() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();
    h.runtime.delete("web").unwrap();
    assert!(matches!(h.runtime.state("web"), Err(Error::NotFound(_))));
}

#[test]
fn delete_after_init_death_succeeds() {
    let h = harness();
    h.runtime.create("web", h.bundle.path()).unwrap();

    let (pid, start_time) = dead_identity();
    fake_running(&h.store, "web", pid, start_time);

    h.runtime.delete("web").unwrap();
    assert!(matches!(h.runtime.state("web"), Err(Error::NotFound(_))));
}

#[test]
fn delete_is_idempotent_on_absent_containers() {
    let h = harness();
    h.runtime.delete("never-existed").unwrap();
    h.runtime.create("web", h.bundle.path()).unwrap();
    h.runtime.delete("web").unwrap();
    h.runtime.delete("web").unwrap();
}

// =============================================================================
// list
// =============================================================================

#[test]
fn list_reports_reconciled_states() {
    let h = harness();
    h.runtime.create("alpha", h.bundle.path()).unwrap();
    h.runtime.create("bravo", h.bundle.path()).unwrap();

    let (pid, start_time) = dead_identity();
    fake_running(&h.store, "bravo", pid, start_time);

    let states = h.runtime.list().unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].id, "alpha");
    assert_eq!(states[0].status, Status::Created);
    assert_eq!(states[1].id, "bravo");
    assert_eq!(states[1].status, Status::Stopped);
}

// =============================================================================
// concurrency
// =============================================================================

#[test]
fn concurrent_creates_of_same_id_have_one_winner() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("run");
    let bundle = make_bundle();
    let bundle_path = bundle.path().to_path_buf();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let root = root.clone();
        let bundle_path: std::path::PathBuf = bundle_path.clone();
        handles.push(std::thread::spawn(move || {
            let runtime = Runtime::new(&root, CgroupPolicy::BestEffort).unwrap();
            runtime.create("web", Path::new(&bundle_path)).is_ok()
        }));
    }

    let wins: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();
    assert_eq!(wins, 1, "exactly one create must win");
}
