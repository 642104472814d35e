//! # Runtime events emitted by the group and the spawn driver.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Process lifecycle**: attach/detach and enablement transitions
//! - **Spawn lifecycle**: driver progress, retries, failure, cancellation
//! - **Group lifecycle**: restart and shutdown
//! - **Subscriber diagnostics**: overflow and panic isolation
//!
//! The [`Event`] struct carries additional metadata such as timestamps,
//! group name, process pid, error messages, and retry delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so events can be ordered correctly even when delivered
//! out-of-order through async channels.
//!
//! ## Event flow examples
//!
//! ### Cold start
//! ```text
//! Group::get()  (no processes yet)
//!   → SpawnStarting
//!   → ProcessAttached        (waiter drained, session handed out)
//!   → SpawnStarting          (still below min_processes)
//!   → ProcessAttached
//!   → SpawnCompleted
//! ```
//!
//! ### Disable of the last enabled process
//! ```text
//! Group::disable()
//!   → ProcessDisabling
//!   → SpawnStarting          (replacement, cap bypassed)
//!   → ProcessAttached
//!   → ProcessDisabled        (waiter acked)
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,
    /// A user callback panicked at the post-lock invocation site; the
    /// panic was absorbed and never re-entered the core.
    CallbackPanicked,

    // === Process lifecycle events ===
    /// A freshly spawned process was attached as enabled.
    ProcessAttached,
    /// A process was detached from the group.
    ProcessDetached,
    /// A process transitioned back to enabled.
    ProcessEnabled,
    /// The last enabled process started draining; a replacement is on the way.
    ProcessDisabling,
    /// A process became fully disabled (inert, retained for re-enablement).
    ProcessDisabled,
    /// A process reached its request budget and was rotated out.
    ProcessRotated,

    // === Spawn lifecycle events ===
    /// The spawn driver is asking the spawner for one process.
    SpawnStarting,
    /// The spawn loop ended because the group's target was met.
    SpawnCompleted,
    /// The spawner failed; parked waiters received the error.
    SpawnFailed,
    /// A transient spawn failure scheduled a retry after a delay.
    SpawnRetryScheduled,
    /// The spawn loop was cancelled during teardown.
    SpawnCancelled,

    // === Group lifecycle events ===
    /// A restart trigger fired; the old generation was detached.
    GroupRestarted,
    /// The group was shut down; remaining waiters were cancelled.
    GroupShutdown,
}

/// Runtime event with optional metadata.
///
/// ## Fields
///
/// - `seq`: Unique sequence number for ordering (monotonically increasing)
/// - `at`: Wall-clock timestamp (may go backwards due to NTP, use for logging only)
/// - `kind`: Event classification
/// - `group`, `pid`, `error`, `attempt`, `delay`: Optional metadata
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// Retry delay before the next spawn attempt (if relevant).
    pub delay: Option<Duration>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Spawn attempt count (starting from 1).
    pub attempt: Option<u64>,
    /// Pid of the process concerned, if applicable.
    pub pid: Option<u32>,
    /// Name of the group, if applicable.
    pub group: Option<String>,
    /// The kind of event.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            at: SystemTime::now(),
            delay: None,
            error: None,
            attempt: None,
            pid: None,
            group: None,
        }
    }

    /// Attaches a group name.
    pub fn with_group(mut self, name: impl Into<String>) -> Self {
        self.group = Some(name.into());
        self
    }

    /// Attaches a process pid.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a spawn attempt count.
    pub fn with_attempt(mut self, n: u64) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a retry delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Creates a subscriber overflow event.
    ///
    /// Emitted when a subscriber's queue is full and an event is dropped.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_error(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    ///
    /// Emitted when a subscriber panics during event processing.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_error(format!("subscriber={subscriber} {info}"))
    }

    /// True for overflow diagnostics (used to suppress event storms).
    pub fn is_subscriber_overflow(&self) -> bool {
        self.kind == EventKind::SubscriberOverflow
    }

    /// True for panic diagnostics (used to suppress event storms).
    pub fn is_subscriber_panic(&self) -> bool {
        self.kind == EventKind::SubscriberPanicked
    }
}
