//! Tests for the group scheduler state machine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use poolvisor::{
    DisableResult, Enablement, Event, EventKind, GetError, Group, GroupBuilder, GroupOptions,
    Process, RequestOptions, Session, SpawnError, Spawner, Subscribe,
};
use tokio::sync::mpsc;

#[derive(Clone, Copy)]
enum Outcome {
    Succeed,
    Fatal(&'static str),
}

/// Scripted spawner: pops one outcome per spawn, defaulting to success.
struct MockSpawner {
    script: Mutex<VecDeque<Outcome>>,
    next_pid: AtomicU32,
    capacity: usize,
    created: Instant,
}

impl MockSpawner {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            next_pid: AtomicU32::new(1),
            capacity,
            created: Instant::now(),
        })
    }

    fn push_outcome(&self, outcome: Outcome) {
        self.script.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl Spawner for MockSpawner {
    async fn spawn(&self, _options: &GroupOptions) -> Result<Arc<Process>, SpawnError> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Succeed);
        match outcome {
            Outcome::Succeed => {
                let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Process::new(pid, self.capacity)))
            }
            Outcome::Fatal(reason) => Err(SpawnError::Fatal {
                reason: reason.to_string(),
            }),
        }
    }

    fn last_used(&self) -> Instant {
        self.created
    }
}

fn options_with(min: usize) -> GroupOptions {
    let mut options = GroupOptions::new("/srv/testapp");
    options.min_processes = min;
    options
}

/// Callback that forwards its result into a channel.
fn forwarding_callback(
    tx: mpsc::UnboundedSender<Result<Session, GetError>>,
) -> poolvisor::GetCallback {
    Box::new(move |res| {
        let _ = tx.send(res);
    })
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached within timeout");
}

/// Brings a group up to `n` enabled processes.
async fn spawn_up(group: &Arc<Group>, n: usize) {
    group.spawn();
    wait_until(|| {
        let snap = group.snapshot();
        snap.count >= n && !snap.spawning
    })
    .await;
}

#[tokio::test]
async fn cold_start_drains_waiter_and_reaches_floor() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(2), spawner).build();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let direct = group.get(RequestOptions::new(), forwarding_callback(tx));
    assert!(direct.is_none(), "an empty group cannot serve synchronously");
    let snap = group.snapshot();
    assert_eq!(snap.get_waiting, 1);
    assert!(snap.spawning);

    let session = rx.recv().await.unwrap().expect("waiter should get a session");
    assert_eq!(session.pid(), 1, "the first spawned process serves the waiter");

    wait_until(|| {
        let snap = group.snapshot();
        snap.count == 2 && !snap.spawning
    })
    .await;
    assert_eq!(group.snapshot().get_waiting, 0);
    session.close();
}

#[tokio::test]
async fn saturated_group_parks_waiters_fifo() {
    let spawner = MockSpawner::new(1);
    let mut options = options_with(2);
    options.max_processes = 2;
    let group = GroupBuilder::new("app", options, spawner).build();
    spawn_up(&group, 2).await;

    // Saturate both single-slot processes.
    let s1 = group
        .get(RequestOptions::new(), Box::new(|_| {}))
        .expect("capacity free");
    let s2 = group
        .get(RequestOptions::new(), Box::new(|_| {}))
        .expect("capacity free");
    assert_ne!(s1.pid(), s2.pid());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..3 {
        let parked = group.get(RequestOptions::new(), forwarding_callback(tx.clone()));
        assert!(parked.is_none());
    }
    let snap = group.snapshot();
    assert_eq!(snap.get_waiting, 3);
    assert!(!snap.spawning, "the process cap must hold spawning back");

    // First close serves the first waiter, on the freed process.
    let pid1 = s1.pid();
    s1.close();
    let w3 = rx.recv().await.unwrap().unwrap();
    assert_eq!(w3.pid(), pid1);

    let pid2 = s2.pid();
    s2.close();
    let w4 = rx.recv().await.unwrap().unwrap();
    assert_eq!(w4.pid(), pid2);

    // Third waiter stays parked until more capacity appears.
    assert_eq!(group.snapshot().get_waiting, 1);
    w3.close();
    let w5 = rx.recv().await.unwrap().unwrap();
    assert_eq!(w5.pid(), pid1);
    w4.close();
    w5.close();
}

#[tokio::test]
async fn disable_last_enabled_process_prespawns_replacement() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();
    spawn_up(&group, 1).await;
    let process = group.processes().pop().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = group.disable(
        &process,
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    assert_eq!(result, DisableResult::Pending);

    // The ack arrives once the replacement is attached.
    rx.recv().await.unwrap();
    wait_until(|| {
        let snap = group.snapshot();
        snap.count == 1 && snap.disabling_count == 0 && snap.disabled_count == 1
    })
    .await;
    assert_eq!(process.enablement(), Enablement::Disabled);
}

#[tokio::test]
async fn disabling_process_receives_no_new_sessions() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();
    spawn_up(&group, 1).await;
    let old = group.processes().pop().unwrap();
    let old_pid = old.pid();

    let result = group.disable(&old, Box::new(|| {}));
    assert_eq!(result, DisableResult::Pending);

    // The draining process has free slots, but must not take this.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let direct = group.get(RequestOptions::new(), forwarding_callback(tx));
    assert!(direct.is_none());

    let session = rx.recv().await.unwrap().unwrap();
    assert_ne!(session.pid(), old_pid);
    session.close();
}

#[tokio::test]
async fn disable_with_spare_capacity_is_immediate() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(2), spawner).build();
    spawn_up(&group, 2).await;

    let process = group.processes().remove(0);
    let result = group.disable(&process, Box::new(|| panic!("caller fires its own callback")));
    assert_eq!(result, DisableResult::Immediate);

    let snap = group.snapshot();
    assert_eq!(snap.count, 1);
    assert_eq!(snap.disabled_count, 1);
    assert_eq!(process.enablement(), Enablement::Disabled);

    // Round-trip: enabling restores scheduling eligibility.
    assert!(group.enable(&process));
    let snap = group.snapshot();
    assert_eq!(snap.count, 2);
    assert_eq!(snap.disabled_count, 0);

    let s1 = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();
    let s2 = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();
    assert_ne!(s1.pid(), s2.pid(), "both processes are schedulable again");
    s1.close();
    s2.close();
}

#[tokio::test]
async fn reenabled_process_serves_past_a_draining_one() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(2), spawner).build();
    spawn_up(&group, 2).await;
    let procs = group.processes();
    let (a, b) = (Arc::clone(&procs[0]), Arc::clone(&procs[1]));

    // B out first (immediate), then A, which as the last enabled process
    // starts draining instead.
    assert_eq!(group.disable(&b, Box::new(|| {})), DisableResult::Immediate);
    assert_eq!(group.disable(&a, Box::new(|| {})), DisableResult::Pending);

    // B comes back while A is still draining. B is idle and enabled, so
    // scheduling must find it even though A predates it.
    assert!(group.enable(&b));
    let session = group
        .get(RequestOptions::new(), Box::new(|_| {}))
        .expect("the re-enabled process has free capacity");
    assert_eq!(session.pid(), b.pid());
    session.close();
}

#[tokio::test]
async fn enable_drains_waiters_parked_behind_a_draining_process() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(2), spawner).build();
    spawn_up(&group, 2).await;
    let procs = group.processes();
    let (a, b) = (Arc::clone(&procs[0]), Arc::clone(&procs[1]));

    assert_eq!(group.disable(&b, Box::new(|| {})), DisableResult::Immediate);
    assert_eq!(group.disable(&a, Box::new(|| {})), DisableResult::Pending);

    // Nothing schedulable: the request parks.
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(group
        .get(RequestOptions::new(), forwarding_callback(tx))
        .is_none());

    // Re-enabling B must serve the parked waiter on the spot.
    assert!(group.enable(&b));
    let session = rx.recv().await.unwrap().unwrap();
    assert_eq!(session.pid(), b.pid());
    session.close();
}

#[tokio::test]
async fn disable_already_disabling_queues_another_ack() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();
    spawn_up(&group, 1).await;
    let process = group.processes().pop().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let tx2 = tx.clone();
    assert_eq!(
        group.disable(&process, Box::new(move || drop(tx.send(1)))),
        DisableResult::Pending
    );
    assert_eq!(
        group.disable(&process, Box::new(move || drop(tx2.send(2)))),
        DisableResult::Pending
    );
    assert_eq!(group.snapshot().disable_waiting, 2);

    // Both acks fire when the replacement lands.
    let mut acks = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    acks.sort_unstable();
    assert_eq!(acks, vec![1, 2]);
}

#[tokio::test]
async fn restart_file_touch_replaces_generation_and_keeps_waiters() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("tmp")).unwrap();

    let spawner = MockSpawner::new(4);
    let mut options = GroupOptions::new(dir.path());
    options.min_processes = 1;
    options.stat_throttle_rate = Duration::ZERO;
    let group = GroupBuilder::new("app", options, spawner).build();
    spawn_up(&group, 1).await;

    let old = group.processes().pop().unwrap();
    let held = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();

    std::fs::write(dir.path().join("tmp").join("restart.txt"), b"now").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let parked = group.get(RequestOptions::new(), forwarding_callback(tx));
    assert!(parked.is_none(), "the caller parks across the restart");
    assert!(old.group().is_none(), "the old generation is detached");

    let session = rx.recv().await.unwrap().unwrap();
    assert_ne!(session.pid(), old.pid(), "served by the new generation");

    // The in-flight session on the detached process is still usable.
    held.close();
    session.close();
}

#[tokio::test]
async fn explicit_restart_swaps_the_generation() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();
    spawn_up(&group, 1).await;
    let old = group.processes().pop().unwrap();

    group.restart(&RequestOptions::new());
    assert!(old.group().is_none());
    assert!(group.snapshot().spawning);

    wait_until(|| {
        let snap = group.snapshot();
        snap.count == 1 && !snap.spawning
    })
    .await;
    assert_ne!(group.processes()[0].pid(), old.pid());
}

#[tokio::test]
async fn spawn_failure_fails_all_waiters_and_recovers() {
    let spawner = MockSpawner::new(4);
    spawner.push_outcome(Outcome::Fatal("boot crash"));
    let group = GroupBuilder::new("app", options_with(1), spawner).build();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(group
        .get(RequestOptions::new(), forwarding_callback(tx.clone()))
        .is_none());
    assert!(group
        .get(RequestOptions::new(), forwarding_callback(tx))
        .is_none());

    for _ in 0..2 {
        let res = rx.recv().await.unwrap();
        assert!(matches!(res, Err(GetError::SpawnFailed(_))));
    }
    wait_until(|| !group.snapshot().spawning).await;
    assert_eq!(group.snapshot().count, 0);

    // A later get restarts the driver and succeeds.
    assert!(group.should_spawn());
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(group
        .get(RequestOptions::new(), forwarding_callback(tx))
        .is_none());
    let session = rx.recv().await.unwrap().unwrap();
    session.close();
}

#[tokio::test]
async fn detach_over_memory_limit_respawns_below_floor() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(2), spawner).build();
    spawn_up(&group, 2).await;

    // The analytics collector decided this process is over its RSS cap.
    let victim = group.processes().remove(0);
    assert!(group.detach(&victim));
    assert!(victim.group().is_none());

    // Below the floor again: the group respawns on its own.
    wait_until(|| {
        let snap = group.snapshot();
        snap.count == 2 && !snap.spawning
    })
    .await;

    // Detaching a stranger is a no-op.
    let stranger = Arc::new(Process::new(9999, 4));
    assert!(!group.detach(&stranger));
}

#[tokio::test]
async fn detach_all_then_respawn_yields_clean_state() {
    let spawner = MockSpawner::new(1);
    let group = GroupBuilder::new("app", options_with(2), spawner).build();
    spawn_up(&group, 2).await;

    // Saturate and park a waiter so detach_all has work to cancel.
    let s1 = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();
    let s2 = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(group
        .get(RequestOptions::new(), forwarding_callback(tx))
        .is_none());

    group.detach_all();
    let res = rx.recv().await.unwrap();
    assert!(matches!(res, Err(GetError::Cancelled)));
    let snap = group.snapshot();
    assert_eq!(
        (snap.count, snap.disabling_count, snap.disabled_count, snap.get_waiting),
        (0, 0, 0, 0)
    );

    // Sessions on detached processes finish without a group.
    s1.close();
    s2.close();

    spawn_up(&group, 2).await;
    let snap = group.snapshot();
    assert_eq!(snap.count, 2);
    assert_eq!(snap.get_waiting, 0);
}

#[tokio::test]
async fn noop_request_returns_dummy_session_without_scheduling() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(0), spawner).build();

    let session = group
        .get(RequestOptions::noop(), Box::new(|_| panic!("noop never parks")))
        .expect("noop returns a dummy synchronously");
    assert_eq!(session.pid(), 0);
    session.close();

    let snap = group.snapshot();
    assert_eq!(snap.count, 0);
    assert_eq!(snap.get_waiting, 0);
}

#[tokio::test]
async fn request_options_merge_into_group_options() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();

    let mut req = RequestOptions::noop();
    req.min_processes = Some(3);
    req.max_requests = Some(50);
    req.memory_limit = Some(256);
    group.get(req, Box::new(|_| {})).unwrap().close();

    let options = group.options();
    assert_eq!(options.min_processes, 3);
    assert_eq!(options.max_requests, 50);
    assert_eq!(options.memory_limit, 256);
    assert!(!options.group_secret.is_empty(), "secret is group-derived");
}

#[tokio::test]
async fn dead_process_found_at_initiation_is_replaced() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();
    spawn_up(&group, 1).await;

    let process = group.processes().pop().unwrap();
    let mut session = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();

    // The worker died out-of-band; initiation surfaces it.
    process.mark_dead();
    let err = session.initiate().unwrap_err();
    assert!(matches!(err, GetError::ProcessVanished { pid } if pid == process.pid()));
    assert!(process.group().is_none());
    // A session that never served a request does not count toward the
    // rotation budget.
    assert_eq!(process.processed(), 0);

    // The group absorbs the crash and respawns to its floor.
    wait_until(|| {
        let snap = group.snapshot();
        snap.count == 1 && !snap.spawning
    })
    .await;
    assert_ne!(group.processes()[0].pid(), process.pid());
}

#[tokio::test]
async fn over_budget_process_is_rotated_out() {
    let spawner = MockSpawner::new(4);
    let mut options = options_with(1);
    options.max_requests = 1;
    let group = GroupBuilder::new("app", options, spawner).build();
    spawn_up(&group, 1).await;
    let first = group.processes().pop().unwrap();

    let session = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();
    session.close();

    // One request served: the process hits its budget and is replaced.
    wait_until(|| {
        let snap = group.snapshot();
        snap.count == 1 && !snap.spawning
    })
    .await;
    wait_until(|| {
        group
            .processes()
            .first()
            .is_some_and(|p| p.pid() != first.pid())
    })
    .await;
    assert!(first.group().is_none());
}

#[tokio::test]
async fn garbage_collectable_only_when_idle_past_timeout() {
    let spawner = MockSpawner::new(4);
    let mut options = options_with(0);
    options.spawner_timeout = Duration::from_millis(5);
    let group = GroupBuilder::new("app", options, spawner).build();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(group.garbage_collectable(Instant::now()));
    assert_eq!(group.usage(), 0);

    // A parked waiter pins the group.
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(group
        .get(RequestOptions::new(), forwarding_callback(tx))
        .is_none());
    assert!(!group.garbage_collectable(Instant::now()));
    rx.recv().await.unwrap().unwrap().close();

    // spawner_timeout of zero disables GC outright.
    let spawner = MockSpawner::new(4);
    let mut options = options_with(0);
    options.spawner_timeout = Duration::ZERO;
    let idle = GroupBuilder::new("idle", options, spawner).build();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!idle.garbage_collectable(Instant::now()));
}

#[tokio::test]
async fn shutdown_cancels_waiters_and_detaches_everything() {
    let spawner = MockSpawner::new(1);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();
    spawn_up(&group, 1).await;
    let held = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(group
        .get(RequestOptions::new(), forwarding_callback(tx))
        .is_none());

    group.shutdown();
    let res = rx.recv().await.unwrap();
    assert!(matches!(res, Err(GetError::Cancelled)));
    let snap = group.snapshot();
    assert_eq!(snap.count, 0);
    assert_eq!(snap.get_waiting, 0);
    held.close();
}

/// Subscriber that records every event kind it sees.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<EventKind>>,
}

impl Recorder {
    fn saw(&self, kind: EventKind) -> bool {
        self.seen.lock().unwrap().contains(&kind)
    }
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, ev: &Event) {
        self.seen.lock().unwrap().push(ev.kind);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn subscribers_observe_the_process_lifecycle() {
    let recorder = Arc::new(Recorder::default());
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner)
        .with_subscribers(vec![Arc::clone(&recorder) as Arc<dyn Subscribe>])
        .build();

    spawn_up(&group, 1).await;
    let process = group.processes().pop().unwrap();
    group.detach(&process);

    wait_until(|| {
        recorder.saw(EventKind::SpawnStarting)
            && recorder.saw(EventKind::ProcessAttached)
            && recorder.saw(EventKind::SpawnCompleted)
            && recorder.saw(EventKind::ProcessDetached)
    })
    .await;
}

#[tokio::test]
async fn waiter_callback_panic_is_absorbed() {
    let spawner = MockSpawner::new(4);
    let group = GroupBuilder::new("app", options_with(1), spawner).build();
    let mut events = group.events();

    assert!(group
        .get(RequestOptions::new(), Box::new(|_| panic!("rude callback")))
        .is_none());

    // The panic is reported, and the group keeps working afterwards.
    loop {
        let ev = events.recv().await.unwrap();
        if ev.kind == poolvisor::EventKind::CallbackPanicked {
            break;
        }
    }
    wait_until(|| !group.snapshot().spawning).await;
    let session = group.get(RequestOptions::new(), Box::new(|_| {})).unwrap();
    session.close();
}
