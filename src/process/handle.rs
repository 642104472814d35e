//! # Worker process handle.
//!
//! [`Process`] is the group's view of one spawned worker: pid, liveness,
//! session accounting, the three-valued enablement tag, and a weak
//! back-reference to the owning group.
//!
//! ## Rules
//! - Ownership runs Group → Process (`Arc`); the Process → Group direction
//!   is a `Weak` guarded by a tiny mutex, the only lock ever taken while
//!   the group lock is held, and only for reads.
//! - The enablement tag is mutated **only under the group lock**; the
//!   atomic store merely makes cross-thread reads well-defined.
//! - Session counters are atomics so that `Session` close accounting does
//!   not need the group lock.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, Weak};

use crate::group::Group;

/// Scheduling eligibility of a process.
///
/// A boolean does not suffice: `Disabling` must simultaneously block new
/// sessions and await a replacement before the tag can settle to `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Enablement {
    /// Eligible for scheduling.
    Enabled = 0,
    /// Still serving existing sessions, not receiving new ones; a
    /// replacement spawn is pending.
    Disabling = 1,
    /// Inert, retained for possible re-enablement.
    Disabled = 2,
}

impl Enablement {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Enablement::Enabled,
            1 => Enablement::Disabling,
            _ => Enablement::Disabled,
        }
    }
}

/// Handle to one spawned worker process.
///
/// Produced by a [`Spawner`](crate::Spawner), attached to a
/// [`Group`](crate::Group), destroyed when detached and the last session
/// ends.
pub struct Process {
    pid: u32,
    /// Per-process concurrency cap; `usage() >= capacity` means full.
    capacity: usize,
    /// Current number of open sessions (the priority key).
    sessions: AtomicUsize,
    /// Lifetime count of completed sessions, for request-budget rotation.
    processed: AtomicU64,
    alive: AtomicBool,
    enablement: AtomicU8,
    /// Non-owning backref; guarded separately so it can be read without
    /// the group lock.
    group: Mutex<Weak<Group>>,
}

impl Process {
    /// Creates a handle for a worker with the given concurrency cap.
    ///
    /// Spawner implementations call this once the worker is ready to serve.
    pub fn new(pid: u32, capacity: usize) -> Self {
        Self {
            pid,
            capacity: capacity.max(1),
            sessions: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            enablement: AtomicU8::new(Enablement::Enabled as u8),
            group: Mutex::new(Weak::new()),
        }
    }

    /// A placeholder process for noop requests. Never attached to a group.
    pub(crate) fn dummy() -> Self {
        Self::new(0, 1)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current session count; the priority key (ascending = least loaded).
    pub fn usage(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    /// Whether the process can take no further concurrent sessions.
    pub fn at_full_capacity(&self) -> bool {
        self.usage() >= self.capacity
    }

    /// Lifetime count of completed sessions.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Marks the process dead; the next session initiation on it fails and
    /// triggers detach.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Current scheduling eligibility. Transitions happen under the group
    /// lock; reads are safe anywhere.
    pub fn enablement(&self) -> Enablement {
        Enablement::from_u8(self.enablement.load(Ordering::Acquire))
    }

    pub(crate) fn set_enablement(&self, e: Enablement) {
        self.enablement.store(e as u8, Ordering::Release);
    }

    /// Increments the session count. Called by the group while opening a
    /// session under its lock.
    pub(crate) fn open_session_slot(&self) {
        self.sessions.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns a slot. Called from session close accounting, outside the
    /// group lock.
    pub(crate) fn close_session_slot(&self) {
        self.sessions.fetch_sub(1, Ordering::AcqRel);
    }

    /// Counts one served request toward the rotation budget. Sessions
    /// whose initiation failed never served anything and are not counted.
    pub(crate) fn record_served(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    /// Upgrades the group backref, if the group is still alive.
    pub fn group(&self) -> Option<std::sync::Arc<Group>> {
        self.group
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .upgrade()
    }

    pub(crate) fn set_group(&self, group: Weak<Group>) {
        *self
            .group
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = group;
    }

    pub(crate) fn clear_group(&self) {
        self.set_group(Weak::new());
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("usage", &self.usage())
            .field("capacity", &self.capacity)
            .field("alive", &self.is_alive())
            .field("enablement", &self.enablement())
            .finish()
    }
}
