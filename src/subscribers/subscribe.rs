//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom event handlers into
//! the pool runtime. Each subscriber owns a bounded delivery lane inside the
//! [`SubscriberSet`](crate::SubscriberSet), drained by a dedicated worker.
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching, retries) – they do **not**
//!   block the group's post-lock path nor other subscribers.
//! - Each subscriber **declares** its lane capacity via
//!   [`Subscribe::queue_capacity`] and what happens on overflow via
//!   [`Subscribe::overflow_policy`]. Dropped events are counted per lane
//!   and reported as `SubscriberOverflow`.

use crate::events::Event;
use async_trait::async_trait;

/// What a full delivery lane does with the next incoming event.
///
/// A log shipper usually wants `DropNewest` (keep the oldest context); a
/// gauge-style monitor wants `DropOldest` (the latest state matters most).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the incoming event and keep the queued backlog.
    #[default]
    DropNewest,
    /// Evict the oldest queued event to make room for the incoming one.
    DropOldest,
}

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should
/// avoid blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's delivery lane.
    fn queue_capacity(&self) -> usize {
        1024
    }

    /// What to do when the lane is full.
    fn overflow_policy(&self) -> OverflowPolicy {
        OverflowPolicy::default()
    }
}
