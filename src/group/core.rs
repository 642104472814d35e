//! # Group: the process-pool scheduling state machine.
//!
//! A [`Group`] owns a set of identical worker processes spawned from the
//! same application and routes session requests to the least-loaded one.
//!
//! ## Architecture
//! ```text
//! get(req, callback)
//!   │
//!   ├─► restart trigger? ──► detach generation, respawn, keep waiters
//!   ├─► merge request overrides into options
//!   ├─► should_spawn()? ──► launch SpawnDriver (options snapshot)
//!   ├─► noop? ──► dummy session, return
//!   ├─► no processes ──► park on get-waitlist (driver will drain it)
//!   └─► pqueue.top()
//!         ├─► schedulable ──► open session, return it synchronously
//!         └─► saturated   ──► park on get-waitlist
//!
//! attach(process)            session close / initiate failure
//!   │                          │
//!   ├─► enable + index         ├─► rekey process in pqueue
//!   ├─► settle disable         ├─► settle a drained Disabling process
//!   │   waitlist               ├─► rotate out over-budget processes
//!   └─► drain get-waitlist     └─► drain get-waitlist
//! ```
//!
//! ## Rules
//! - One mutex serializes all group state; **nothing user-visible runs
//!   under it**. Mutators collect deferred callbacks into a post-lock
//!   action list, verify the state invariants, release, then run the list
//!   in order. Callback panics are absorbed and reported as events.
//! - `get` is hybrid: a `Some(session)` return means the callback was
//!   dropped unfired; a `None` return means the callback fires exactly
//!   once later (with a session or an error).
//! - Waiters resolve in FIFO order once capacity appears.
//! - A `Disabling` process stays in the process list but leaves the
//!   priority index, so it never receives new sessions; it settles to
//!   `Disabled` when its last session closes or a replacement attaches.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::{GroupOptions, RequestOptions};
use crate::error::GetError;
use crate::events::{Bus, Event, EventKind};
use crate::group::context::{PoolBackref, PoolContext};
use crate::group::restart::RestartState;
use crate::process::{Enablement, Process, Session};
use crate::sched::{
    DisableCallback, DisableWaiter, GetCallback, GetWaiter, PostLockAction, PriorityIndex,
};
use crate::spawn::{SpawnDriver, SpawnRetry, Spawner};
use crate::subscribers::SubscriberSet;

/// Outcome of a [`Group::disable`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableResult {
    /// The process is disabled; the caller fires its own callback.
    Immediate,
    /// The process is draining; the callback fires when it settles (or
    /// when the process vanishes first).
    Pending,
}

/// Counters snapshot for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSnapshot {
    /// Enabled + disabling processes.
    pub count: usize,
    pub disabling_count: usize,
    pub disabled_count: usize,
    pub get_waiting: usize,
    pub disable_waiting: usize,
    pub spawning: bool,
}

/// Mutable state behind the group lock.
struct GroupState {
    options: GroupOptions,
    /// Enabled and disabling processes, in attach order.
    processes: Vec<Arc<Process>>,
    /// Disabled processes, in disable order.
    disabled_processes: Vec<Arc<Process>>,
    /// Least-usage index over `processes`.
    pqueue: PriorityIndex,
    count: usize,
    disabling_count: usize,
    disabled_count: usize,
    get_waitlist: VecDeque<GetWaiter>,
    disable_waitlist: VecDeque<DisableWaiter>,
    spawning: bool,
    restart: RestartState,
}

impl GroupState {
    /// A process the scheduler may open a new session on.
    ///
    /// The priority index holds exactly the Enabled processes (Disabling
    /// ones leave it when they start draining), so the least-loaded root
    /// is the best eligible candidate whenever it has a free slot.
    fn schedulable_top(&self) -> Option<&Arc<Process>> {
        let top = self.pqueue.top()?;
        debug_assert_eq!(top.enablement(), Enablement::Enabled);
        if top.at_full_capacity() {
            None
        } else {
            Some(top)
        }
    }

    /// Asserts the cross-cutting invariants. Debug builds abort at the
    /// violation site; release builds compile this away.
    fn verify_invariants(&self) {
        debug_assert!(self.disabling_count <= self.count);
        debug_assert_eq!(self.processes.len(), self.count);
        debug_assert_eq!(self.disabled_processes.len(), self.disabled_count);
        debug_assert_eq!(self.pqueue.len(), self.count - self.disabling_count);
        debug_assert!(
            !(self.count > 0 && self.disabling_count == self.count) || self.spawning,
            "a fully-disabling group must be racing to spawn a replacement"
        );
        // Checked over the process list directly, independent of how the
        // scheduler picks candidates.
        debug_assert!(
            self.get_waitlist.is_empty()
                || !self
                    .processes
                    .iter()
                    .any(|p| p.enablement() == Enablement::Enabled && !p.at_full_capacity()),
            "waiters may not be parked while a process could serve them"
        );
        debug_assert!(
            !(self.processes.is_empty() && !self.spawning) || self.get_waitlist.is_empty(),
            "an empty, idle group may not hold waiters"
        );
        debug_assert!(self.disable_waitlist.len() >= self.disabling_count);
        debug_assert!(self
            .processes
            .iter()
            .all(|p| p.enablement() != Enablement::Disabled));
        debug_assert!(self
            .disabled_processes
            .iter()
            .all(|p| p.enablement() == Enablement::Disabled));
    }
}

/// Scheduler for one application's worker processes.
///
/// Construct through [`GroupBuilder`](crate::GroupBuilder); a tokio runtime
/// must be active, as the group launches background tasks (spawn driver,
/// subscriber workers).
pub struct Group {
    name: String,
    /// Opaque token spawned processes use to authenticate callbacks.
    secret: String,
    spawner: Arc<dyn Spawner>,
    bus: Bus,
    retry: SpawnRetry,
    /// Cancels every background task the group ever launched.
    runtime_token: CancellationToken,
    pool: PoolBackref,
    state: Mutex<GroupState>,
    /// Delivery lanes for this group's subscribers.
    subs: Arc<SubscriberSet>,
}

impl Group {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        name: String,
        secret: String,
        options: GroupOptions,
        spawner: Arc<dyn Spawner>,
        bus: Bus,
        retry: SpawnRetry,
        runtime_token: CancellationToken,
        subs: Arc<SubscriberSet>,
    ) -> Arc<Self> {
        let restart = RestartState::new(
            options.restart_file.clone(),
            options.always_restart_file.clone(),
        );
        Arc::new(Self {
            name,
            secret,
            spawner,
            bus,
            retry,
            runtime_token,
            pool: PoolBackref::empty(),
            state: Mutex::new(GroupState {
                options,
                processes: Vec::new(),
                disabled_processes: Vec::new(),
                pqueue: PriorityIndex::new(),
                count: 0,
                disabling_count: 0,
                disabled_count: 0,
                get_waitlist: VecDeque::new(),
                disable_waitlist: VecDeque::new(),
                spawning: false,
                restart,
            }),
            subs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The callback-authentication token passed to spawned processes.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// A copy of the current effective options.
    pub fn options(&self) -> GroupOptions {
        self.lock_state().options.clone()
    }

    /// A new receiver of the group's event stream.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// The enabled and disabling processes, in attach order.
    ///
    /// The pool iterates this for analytics collection and admin tooling.
    pub fn processes(&self) -> Vec<Arc<Process>> {
        self.lock_state().processes.clone()
    }

    /// The disabled processes, in disable order.
    pub fn disabled_processes(&self) -> Vec<Arc<Process>> {
        self.lock_state().disabled_processes.clone()
    }

    /// Delivery counters for each subscriber lane (queued depth, drops).
    pub fn subscriber_stats(&self) -> Vec<crate::subscribers::SubscriberStats> {
        self.subs.stats()
    }

    /// Counter snapshot for monitoring and tests.
    pub fn snapshot(&self) -> GroupSnapshot {
        let st = self.lock_state();
        GroupSnapshot {
            count: st.count,
            disabling_count: st.disabling_count,
            disabled_count: st.disabled_count,
            get_waiting: st.get_waitlist.len(),
            disable_waiting: st.disable_waitlist.len(),
            spawning: st.spawning,
        }
    }

    /// Load metric the pool uses for group-level decisions: enabled
    /// processes plus one for an in-flight spawn.
    pub fn usage(&self) -> usize {
        let st = self.lock_state();
        st.count + usize::from(st.spawning)
    }

    pub fn is_spawning(&self) -> bool {
        self.lock_state().spawning
    }

    /// Installs the pool back-reference. Thread-safe.
    pub fn set_pool(&self, pool: Weak<dyn PoolContext>) {
        self.pool.set(pool);
    }

    /// True when the owning pool released this group. Thread-safe.
    pub fn detached(&self) -> bool {
        self.pool.get().is_none()
    }

    // ---------------------------
    // Scheduling
    // ---------------------------

    /// Requests a session.
    ///
    /// Hybrid contract: `Some(session)` is the synchronous fast path and
    /// the callback is dropped unfired; `None` parks the callback on the
    /// get-waitlist for exactly one later invocation, in FIFO order, with
    /// either a session or an error.
    pub fn get(self: &Arc<Self>, req: RequestOptions, callback: GetCallback) -> Option<Session> {
        let mut post: Vec<PostLockAction> = Vec::new();
        let mut events: Vec<Event> = Vec::new();
        let mut driver_snapshot: Option<GroupOptions> = None;

        let result = {
            let mut st = self.lock_state();

            let throttle = req
                .stat_throttle_rate
                .unwrap_or(st.options.stat_throttle_rate);
            if st.restart.needs_restart(throttle) {
                if self.restart_locked(&mut st, &req, &mut post, &mut events) {
                    driver_snapshot = Some(st.options.clone());
                }
            } else {
                st.options.merge_request(&req);
            }

            if !req.noop && driver_snapshot.is_none() && self.should_spawn_locked(&st) {
                st.spawning = true;
                driver_snapshot = Some(st.options.clone());
            }

            let result = if req.noop {
                // Wakeup-only request: all side effects above, no real
                // scheduling below.
                Some(Session::new(Arc::new(Process::dummy())))
            } else {
                let mut opened = None;
                while let Some(top) = st.schedulable_top().cloned() {
                    if top.is_alive() {
                        opened = Some(Self::open_session_locked(&mut st, top));
                        break;
                    }
                    // The least-loaded worker died out-of-band; drop the
                    // corpse and try the next one.
                    self.detach_locked(&mut st, &top, &mut post, &mut events);
                }
                if opened.is_none() {
                    st.get_waitlist.push_back(GetWaiter::new(req, callback));
                    if !st.spawning
                        && (self.respawn_required_locked(&st) || self.should_spawn_locked(&st))
                    {
                        st.spawning = true;
                        if driver_snapshot.is_none() {
                            driver_snapshot = Some(st.options.clone());
                        }
                    }
                    debug_assert!(st.count > 0 || st.spawning);
                }
                opened
            };

            st.verify_invariants();
            result
        };

        self.after_unlock(events, post);
        if let Some(snapshot) = driver_snapshot {
            self.launch_driver(snapshot);
        }
        result
    }

    /// Attaches a freshly spawned process as enabled, settles the disable
    /// waitlist, and drains parked get-waiters onto the new capacity.
    pub fn attach(self: &Arc<Self>, process: Arc<Process>) {
        let mut post = Vec::new();
        let mut events = Vec::new();
        {
            let mut st = self.lock_state();
            self.attach_locked(&mut st, process, &mut post, &mut events);
            self.assign_sessions_locked(&mut st, &mut post, &mut events);
            st.verify_invariants();
        }
        self.after_unlock(events, post);
    }

    /// Detaches a process from the group.
    ///
    /// In-flight sessions on the detached handle run to completion; their
    /// close simply no longer reaches this group. Pending disable waiters
    /// keyed to the process are acked (the process is gone). Returns false
    /// when the process was not a member.
    ///
    /// Used by the pool's collectors too, e.g. when a process exceeds
    /// `memory_limit`. A respawn is triggered when the group drops below
    /// its floor with demand outstanding.
    pub fn detach(self: &Arc<Self>, process: &Arc<Process>) -> bool {
        let mut post = Vec::new();
        let mut events = Vec::new();
        let mut driver_snapshot = None;

        let found = {
            let mut st = self.lock_state();
            let found = self.detach_locked(&mut st, process, &mut post, &mut events);
            if found {
                self.assign_sessions_locked(&mut st, &mut post, &mut events);
                if !st.spawning && (self.respawn_required_locked(&st) || self.should_spawn_locked(&st))
                {
                    st.spawning = true;
                    driver_snapshot = Some(st.options.clone());
                }
            }
            st.verify_invariants();
            found
        };

        self.after_unlock(events, post);
        if let Some(snapshot) = driver_snapshot {
            self.launch_driver(snapshot);
        }
        found
    }

    /// Detaches every process and cancels all parked work.
    ///
    /// Disable waiters are acked; get-waiters are failed with
    /// [`GetError::Cancelled`] so no callback is left dangling.
    pub fn detach_all(&self) {
        let mut post = Vec::new();
        let mut events = Vec::new();
        {
            let mut st = self.lock_state();
            self.detach_all_locked(&mut st, &mut post, &mut events);
            Self::assign_error_locked(&mut st, GetError::Cancelled, &mut post);
            st.verify_invariants();
        }
        self.after_unlock(events, post);
    }

    /// Returns a process to service.
    ///
    /// Disabling → Enabled resolves its pending disable waiters; Disabled →
    /// Enabled re-indexes it and may immediately serve parked waiters.
    pub fn enable(self: &Arc<Self>, process: &Arc<Process>) -> bool {
        let mut post = Vec::new();
        let mut events = Vec::new();

        let found = {
            let mut st = self.lock_state();
            let found = match process.enablement() {
                Enablement::Disabling if Self::member_of(&st.processes, process) => {
                    process.set_enablement(Enablement::Enabled);
                    st.pqueue.push(Arc::clone(process), process.usage());
                    st.disabling_count -= 1;
                    Self::ack_disable_waiters_locked(&mut st, process.pid(), &mut post);
                    events.push(
                        Event::now(EventKind::ProcessEnabled)
                            .with_group(&self.name)
                            .with_pid(process.pid()),
                    );
                    true
                }
                Enablement::Disabled if Self::member_of(&st.disabled_processes, process) => {
                    Self::remove_member(&mut st.disabled_processes, process);
                    st.disabled_count -= 1;
                    process.set_enablement(Enablement::Enabled);
                    st.processes.push(Arc::clone(process));
                    st.pqueue.push(Arc::clone(process), process.usage());
                    st.count += 1;
                    events.push(
                        Event::now(EventKind::ProcessEnabled)
                            .with_group(&self.name)
                            .with_pid(process.pid()),
                    );
                    true
                }
                Enablement::Enabled => Self::member_of(&st.processes, process),
                _ => false,
            };
            if found {
                self.assign_sessions_locked(&mut st, &mut post, &mut events);
            }
            st.verify_invariants();
            found
        };

        self.after_unlock(events, post);
        found
    }

    /// Takes a process out of service.
    ///
    /// See [`DisableResult`]: disabling the last enabled process cannot
    /// complete until a replacement is attached, so it parks the callback
    /// and forces a spawn (bypassing the process cap; the administrator
    /// asked for this explicitly).
    pub fn disable(
        self: &Arc<Self>,
        process: &Arc<Process>,
        callback: DisableCallback,
    ) -> DisableResult {
        let mut post = Vec::new();
        let mut events = Vec::new();
        let mut driver_snapshot = None;

        let result = {
            let mut st = self.lock_state();
            let result = match process.enablement() {
                Enablement::Enabled if Self::member_of(&st.processes, process) => {
                    debug_assert!(st.count > 0);
                    if st.count - st.disabling_count == 1 {
                        // Last enabled process: keep it serving its open
                        // sessions while a replacement spawns, regardless
                        // of the cap. It leaves the priority index so the
                        // scheduler never offers it new work.
                        process.set_enablement(Enablement::Disabling);
                        st.pqueue.erase(process.pid());
                        st.disabling_count += 1;
                        st.disable_waitlist
                            .push_back(DisableWaiter::new(Arc::clone(process), callback));
                        if !st.spawning {
                            st.spawning = true;
                            driver_snapshot = Some(st.options.clone());
                        }
                        events.push(
                            Event::now(EventKind::ProcessDisabling)
                                .with_group(&self.name)
                                .with_pid(process.pid()),
                        );
                        DisableResult::Pending
                    } else {
                        Self::remove_member(&mut st.processes, process);
                        st.pqueue.erase(process.pid());
                        st.count -= 1;
                        process.set_enablement(Enablement::Disabled);
                        st.disabled_processes.push(Arc::clone(process));
                        st.disabled_count += 1;
                        events.push(
                            Event::now(EventKind::ProcessDisabled)
                                .with_group(&self.name)
                                .with_pid(process.pid()),
                        );
                        DisableResult::Immediate
                    }
                }
                Enablement::Disabling if Self::member_of(&st.processes, process) => {
                    st.disable_waitlist
                        .push_back(DisableWaiter::new(Arc::clone(process), callback));
                    DisableResult::Pending
                }
                _ => DisableResult::Immediate,
            };
            st.verify_invariants();
            result
        };

        self.after_unlock(events, post);
        if let Some(snapshot) = driver_snapshot {
            self.launch_driver(snapshot);
        }
        result
    }

    /// Replaces the current process generation.
    ///
    /// Every process is detached (ongoing sessions continue to completion
    /// on the detached handles, then the workers exit), the options are
    /// refreshed with the request's overrides, and spawning is triggered.
    /// Parked get-waiters stay parked and are served by the new
    /// generation.
    pub fn restart(self: &Arc<Self>, req: &RequestOptions) {
        let mut post = Vec::new();
        let mut events = Vec::new();

        let driver_snapshot = {
            let mut st = self.lock_state();
            let launch = self.restart_locked(&mut st, req, &mut post, &mut events);
            st.verify_invariants();
            launch.then(|| st.options.clone())
        };

        self.after_unlock(events, post);
        if let Some(snapshot) = driver_snapshot {
            self.launch_driver(snapshot);
        }
    }

    /// Whether the next `get` warrants a new process.
    pub fn should_spawn(&self) -> bool {
        self.should_spawn_locked(&self.lock_state())
    }

    /// Ensures a spawn driver is running.
    pub fn spawn(self: &Arc<Self>) {
        let snapshot = {
            let mut st = self.lock_state();
            if st.spawning {
                None
            } else {
                st.spawning = true;
                Some(st.options.clone())
            }
        };
        if let Some(snapshot) = snapshot {
            self.launch_driver(snapshot);
        }
    }

    /// Whether the pool may destroy this group.
    pub fn garbage_collectable(&self, now: Instant) -> bool {
        let st = self.lock_state();
        let idle = st.count == 0 && !st.spawning;
        let timeout = match st.options.gc_timeout() {
            Some(t) => t,
            None => return false,
        };
        idle
            && st.get_waitlist.is_empty()
            && st.disabled_processes.is_empty()
            && now.saturating_duration_since(self.spawner.last_used()) > timeout
    }

    /// Tears the group down: cancels background tasks, detaches every
    /// process, fails parked waiters, and schedules spawner cleanup.
    pub fn shutdown(self: &Arc<Self>) {
        self.runtime_token.cancel();

        let mut post = Vec::new();
        let mut events = Vec::new();
        {
            let mut st = self.lock_state();
            self.detach_all_locked(&mut st, &mut post, &mut events);
            Self::assign_error_locked(&mut st, GetError::Cancelled, &mut post);
            st.verify_invariants();
        }
        events.push(Event::now(EventKind::GroupShutdown).with_group(&self.name));
        self.after_unlock(events, post);
        self.cleanup_spawner();
    }

    /// Runs the spawner's idempotent teardown off the async runtime.
    pub fn cleanup_spawner(&self) {
        let spawner = Arc::clone(&self.spawner);
        tokio::task::spawn_blocking(move || spawner.cleanup());
    }

    // ---------------------------
    // Session hooks
    // ---------------------------

    /// Called when a session on `process` completed; returns its load to
    /// the scheduler and serves whoever was waiting for it.
    pub(crate) fn on_session_close(self: &Arc<Self>, process: &Arc<Process>) {
        let mut post = Vec::new();
        let mut events = Vec::new();
        let mut driver_snapshot = None;

        {
            let mut st = self.lock_state();
            match process.enablement() {
                Enablement::Enabled if Self::member_of(&st.processes, process) => {
                    st.pqueue.rekey(process.pid(), process.usage());

                    if self.over_request_budget_locked(&st, process) {
                        events.push(
                            Event::now(EventKind::ProcessRotated)
                                .with_group(&self.name)
                                .with_pid(process.pid()),
                        );
                        self.detach_locked(&mut st, process, &mut post, &mut events);
                    }
                }
                Enablement::Disabling
                    if Self::member_of(&st.processes, process) && process.usage() == 0 =>
                {
                    // Fully drained: settle it and ack its waiters.
                    Self::settle_disabling_locked(&mut st, process, &mut post);
                    events.push(
                        Event::now(EventKind::ProcessDisabled)
                            .with_group(&self.name)
                            .with_pid(process.pid()),
                    );
                }
                _ => {}
            }

            self.assign_sessions_locked(&mut st, &mut post, &mut events);
            if !st.spawning && (self.respawn_required_locked(&st) || self.should_spawn_locked(&st)) {
                st.spawning = true;
                driver_snapshot = Some(st.options.clone());
            }
            st.verify_invariants();
        }

        self.after_unlock(events, post);
        if let Some(snapshot) = driver_snapshot {
            self.launch_driver(snapshot);
        }
    }

    /// Called when request delivery on a fresh session failed because the
    /// worker died: the corpse is detached and demand is re-routed.
    pub(crate) fn on_session_initiate_failure(self: &Arc<Self>, process: &Arc<Process>) {
        process.mark_dead();
        self.detach(process);
    }

    // ---------------------------
    // Spawn driver plumbing
    // ---------------------------

    pub(crate) fn spawner(&self) -> &Arc<dyn Spawner> {
        &self.spawner
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Accepts one process from the spawn driver. Returns whether the
    /// driver should keep spawning; when it returns false the spawning
    /// flag is already cleared and `SpawnCompleted` published.
    pub(crate) fn attach_spawned(
        self: &Arc<Self>,
        process: Arc<Process>,
        snapshot: &GroupOptions,
    ) -> bool {
        let mut post = Vec::new();
        let mut events = Vec::new();

        let keep_going = {
            let mut st = self.lock_state();
            self.attach_locked(&mut st, process, &mut post, &mut events);
            self.assign_sessions_locked(&mut st, &mut post, &mut events);

            let below_floor = st.count < snapshot.min_processes;
            let demand = !st.get_waitlist.is_empty();
            let under_cap = snapshot.process_cap().map_or(true, |cap| st.count < cap);
            let keep_going = (below_floor || demand) && under_cap;
            if !keep_going {
                st.spawning = false;
            }
            st.verify_invariants();
            keep_going
        };

        if !keep_going {
            events.push(Event::now(EventKind::SpawnCompleted).with_group(&self.name));
        }
        self.after_unlock(events, post);
        keep_going
    }

    /// Terminates the spawn loop: clears the spawning flag and surfaces
    /// `error` to every parked get-waiter (backpressure instead of silent
    /// retry).
    ///
    /// A pending disable cannot wait for a replacement that is no longer
    /// coming, so Disabling processes settle to Disabled here (they keep
    /// serving their remaining sessions) and their waiters are acked.
    pub(crate) fn abort_spawn_loop(&self, error: GetError) {
        let mut post = Vec::new();
        let mut events = Vec::new();
        {
            let mut st = self.lock_state();
            st.spawning = false;

            let draining: Vec<Arc<Process>> = st
                .processes
                .iter()
                .filter(|p| p.enablement() == Enablement::Disabling)
                .cloned()
                .collect();
            for process in draining {
                Self::settle_disabling_locked(&mut st, &process, &mut post);
                events.push(
                    Event::now(EventKind::ProcessDisabled)
                        .with_group(&self.name)
                        .with_pid(process.pid()),
                );
            }

            Self::assign_error_locked(&mut st, error.clone(), &mut post);
            st.verify_invariants();
        }

        let kind = if matches!(error, GetError::Cancelled) {
            EventKind::SpawnCancelled
        } else {
            EventKind::SpawnFailed
        };
        events.push(
            Event::now(kind)
                .with_group(&self.name)
                .with_error(error.to_string()),
        );
        self.after_unlock(events, post);
    }

    // ---------------------------
    // Locked helpers
    // ---------------------------

    fn lock_state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn member_of(list: &[Arc<Process>], process: &Arc<Process>) -> bool {
        list.iter().any(|p| Arc::ptr_eq(p, process))
    }

    fn remove_member(list: &mut Vec<Arc<Process>>, process: &Arc<Process>) {
        if let Some(idx) = list.iter().position(|p| Arc::ptr_eq(p, process)) {
            list.remove(idx);
        }
    }

    /// Opens a session on `process` and re-indexes it under its new load.
    fn open_session_locked(st: &mut GroupState, process: Arc<Process>) -> Session {
        let session = Session::new(Arc::clone(&process));
        st.pqueue.rekey(process.pid(), process.usage());
        session
    }

    fn attach_locked(
        self: &Arc<Self>,
        st: &mut GroupState,
        process: Arc<Process>,
        post: &mut Vec<PostLockAction>,
        events: &mut Vec<Event>,
    ) {
        process.set_group(Arc::downgrade(self));
        process.set_enablement(Enablement::Enabled);
        st.pqueue.push(Arc::clone(&process), process.usage());
        st.processes.push(Arc::clone(&process));
        st.count += 1;
        events.push(
            Event::now(EventKind::ProcessAttached)
                .with_group(&self.name)
                .with_pid(process.pid()),
        );

        // The replacement is here: settle every process the disable
        // waitlist was holding open, then ack all waiters.
        let waiters: Vec<DisableWaiter> = st.disable_waitlist.drain(..).collect();
        post.reserve(waiters.len());
        for waiter in waiters {
            // The same process may appear multiple times.
            if waiter.process.enablement() == Enablement::Disabling {
                Self::remove_member(&mut st.processes, &waiter.process);
                waiter.process.set_enablement(Enablement::Disabled);
                st.disabled_processes.push(Arc::clone(&waiter.process));
                st.count -= 1;
                st.disabling_count -= 1;
                st.disabled_count += 1;
                events.push(
                    Event::now(EventKind::ProcessDisabled)
                        .with_group(&self.name)
                        .with_pid(waiter.process.pid()),
                );
            }
            post.push(waiter.callback);
        }
    }

    fn detach_locked(
        self: &Arc<Self>,
        st: &mut GroupState,
        process: &Arc<Process>,
        post: &mut Vec<PostLockAction>,
        events: &mut Vec<Event>,
    ) -> bool {
        let found = match process.enablement() {
            Enablement::Enabled | Enablement::Disabling
                if Self::member_of(&st.processes, process) =>
            {
                Self::remove_member(&mut st.processes, process);
                st.count -= 1;
                if process.enablement() == Enablement::Disabling {
                    st.disabling_count -= 1;
                    Self::ack_disable_waiters_locked(st, process.pid(), post);
                } else {
                    st.pqueue.erase(process.pid());
                }
                true
            }
            Enablement::Disabled if Self::member_of(&st.disabled_processes, process) => {
                Self::remove_member(&mut st.disabled_processes, process);
                st.disabled_count -= 1;
                true
            }
            _ => false,
        };

        if found {
            process.clear_group();
            events.push(
                Event::now(EventKind::ProcessDetached)
                    .with_group(&self.name)
                    .with_pid(process.pid()),
            );
        }
        found
    }

    fn detach_all_locked(
        &self,
        st: &mut GroupState,
        post: &mut Vec<PostLockAction>,
        events: &mut Vec<Event>,
    ) {
        for p in st.processes.iter().chain(st.disabled_processes.iter()) {
            p.clear_group();
            events.push(
                Event::now(EventKind::ProcessDetached)
                    .with_group(&self.name)
                    .with_pid(p.pid()),
            );
        }
        st.processes.clear();
        st.disabled_processes.clear();
        st.pqueue.clear();
        st.count = 0;
        st.disabling_count = 0;
        st.disabled_count = 0;

        post.reserve(st.disable_waitlist.len());
        for waiter in st.disable_waitlist.drain(..) {
            post.push(waiter.callback);
        }
    }

    /// Moves a drained Disabling process to the disabled list and acks its
    /// waiters. The process already left the priority index when it
    /// started draining.
    fn settle_disabling_locked(
        st: &mut GroupState,
        process: &Arc<Process>,
        post: &mut Vec<PostLockAction>,
    ) {
        Self::remove_member(&mut st.processes, process);
        process.set_enablement(Enablement::Disabled);
        st.disabled_processes.push(Arc::clone(process));
        st.count -= 1;
        st.disabling_count -= 1;
        st.disabled_count += 1;
        Self::ack_disable_waiters_locked(st, process.pid(), post);
    }

    /// Defers the callbacks of every disable waiter keyed to `pid`.
    fn ack_disable_waiters_locked(
        st: &mut GroupState,
        pid: u32,
        post: &mut Vec<PostLockAction>,
    ) {
        let mut kept = VecDeque::with_capacity(st.disable_waitlist.len());
        for waiter in st.disable_waitlist.drain(..) {
            if waiter.process.pid() == pid {
                post.push(waiter.callback);
            } else {
                kept.push_back(waiter);
            }
        }
        st.disable_waitlist = kept;
    }

    /// Hands sessions to parked get-waiters while capacity lasts, FIFO.
    ///
    /// If the top process died out-of-band, the corpse is detached and the
    /// remaining waiters receive [`GetError::ProcessVanished`].
    fn assign_sessions_locked(
        self: &Arc<Self>,
        st: &mut GroupState,
        post: &mut Vec<PostLockAction>,
        events: &mut Vec<Event>,
    ) {
        while !st.get_waitlist.is_empty() {
            let top = match st.schedulable_top().cloned() {
                Some(top) => top,
                None => break,
            };
            if !top.is_alive() {
                let pid = top.pid();
                self.detach_locked(st, &top, post, events);
                Self::assign_error_locked(st, GetError::ProcessVanished { pid }, post);
                return;
            }
            let session = Self::open_session_locked(st, top);
            if let Some(waiter) = st.get_waitlist.pop_front() {
                post.push(Box::new(move || (waiter.callback)(Ok(session))));
            }
        }
    }

    /// Fails every parked get-waiter with `error`, FIFO.
    fn assign_error_locked(
        st: &mut GroupState,
        error: GetError,
        post: &mut Vec<PostLockAction>,
    ) {
        post.reserve(st.get_waitlist.len());
        for waiter in st.get_waitlist.drain(..) {
            let err = error.clone();
            post.push(Box::new(move || (waiter.callback)(Err(err))));
        }
    }

    /// Returns true when the caller must launch a fresh spawn driver;
    /// false means one is already active and keeps running.
    fn restart_locked(
        self: &Arc<Self>,
        st: &mut GroupState,
        req: &RequestOptions,
        post: &mut Vec<PostLockAction>,
        events: &mut Vec<Event>,
    ) -> bool {
        self.detach_all_locked(st, post, events);

        // Fresh options generation: current values plus the request's
        // overrides; the secret survives restarts.
        st.options.merge_request(req);
        st.options.group_secret = self.secret.clone();
        events.push(Event::now(EventKind::GroupRestarted).with_group(&self.name));

        if st.spawning {
            false
        } else {
            st.spawning = true;
            true
        }
    }

    fn should_spawn_locked(&self, st: &GroupState) -> bool {
        if st.spawning {
            return false;
        }
        if st.count < st.options.min_processes {
            return true;
        }
        // An empty group must spawn to resolve any demand at all; the
        // pool-wide gate only moderates growth beyond that.
        if st.count == 0 {
            return true;
        }
        let saturated = st.schedulable_top().is_none();
        let under_cap = st.options.process_cap().map_or(true, |cap| st.count < cap);
        let pool_allows = self.pool.get().map_or(true, |pool| !pool.at_capacity());
        saturated && under_cap && pool_allows
    }

    /// Spawning is not optional when waiters would otherwise dangle on an
    /// empty, idle group.
    fn respawn_required_locked(&self, st: &GroupState) -> bool {
        st.count == 0 && !st.get_waitlist.is_empty()
    }

    fn over_request_budget_locked(&self, st: &GroupState, process: &Arc<Process>) -> bool {
        st.options.max_requests > 0
            && process.enablement() == Enablement::Enabled
            && process.processed() >= st.options.max_requests
    }

    fn launch_driver(self: &Arc<Self>, snapshot: GroupOptions) {
        let driver = SpawnDriver::new(Arc::clone(self), snapshot, self.retry);
        let token = self.runtime_token.child_token();
        tokio::spawn(driver.run(token));
    }

    /// Publishes collected events and runs deferred callbacks, in order,
    /// after the lock is released. Callback panics are absorbed and
    /// reported; they never re-enter the core.
    fn after_unlock(&self, events: Vec<Event>, post: Vec<PostLockAction>) {
        for ev in events {
            self.bus.publish(ev);
        }
        for action in post {
            if catch_unwind(AssertUnwindSafe(action)).is_err() {
                self.bus.publish(
                    Event::now(EventKind::CallbackPanicked)
                        .with_group(&self.name)
                        .with_error("user callback panicked"),
                );
            }
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("count", &snap.count)
            .field("disabling", &snap.disabling_count)
            .field("disabled", &snap.disabled_count)
            .field("get_waiting", &snap.get_waiting)
            .field("spawning", &snap.spawning)
            .finish()
    }
}
