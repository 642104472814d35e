//! Group core: the scheduling state machine and its wiring.
//!
//! ## Files & responsibilities
//! - **core.rs**: the state machine; routes `get` requests by least usage,
//!   coordinates attach/detach/enable/disable, settles waitlists, owns the
//!   post-lock callback discipline and the state invariants.
//! - **builder.rs**: constructs a group (secret generation, bus, subscriber
//!   fan-out, pool backref).
//! - **restart.rs**: throttled restart-file triggers.
//! - **context.rs**: the pool-side seam (capacity gate + back-reference).
//!
//! ## Event data-plane (who publishes)
//! - **Group** → `ProcessAttached/Detached/Enabled/Disabling/Disabled`,
//!   `ProcessRotated`, `GroupRestarted`, `GroupShutdown`, `SpawnCompleted`,
//!   `SpawnFailed`, `SpawnCancelled`, `CallbackPanicked`
//! - **SpawnDriver** → `SpawnStarting`, `SpawnRetryScheduled`
//! - **SubscriberSet** → `SubscriberOverflow` (lane drops),
//!   `SubscriberPanicked` (worker isolation)
//!
//! ## Locking
//! One mutex per group serializes all state mutation. The discipline is:
//! ```text
//! lock → mutate → collect post-lock actions → verify invariants → unlock
//!      → publish events → run actions (panics absorbed)
//! ```
//! No I/O, no user callbacks, and no awaits happen under the lock; the
//! only nested lock is the tiny process/pool backref mutex, read-only.

mod builder;
mod context;
mod core;
mod restart;

pub use builder::GroupBuilder;
pub use context::PoolContext;
pub use core::{DisableResult, Group, GroupSnapshot};
