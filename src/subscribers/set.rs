//! # Non-blocking event fan-out over per-subscriber delivery lanes.
//!
//! [`SubscriberSet`] hands every group event to every subscriber without
//! ever blocking the publisher (which runs on the group's post-lock path).
//!
//! ## Architecture
//! ```text
//! emit(event)
//!     │            (synchronous, bounded ring buffers)
//!     ├──► [lane 1: buf + policy] ──notify──► worker 1 ──► sub1.on_event()
//!     ├──► [lane 2: buf + policy] ──notify──► worker 2 ──► sub2.on_event()
//!     └──► [lane N: buf + policy] ──notify──► worker N ──► subN.on_event()
//!                   │
//!                   └── full? apply the lane's OverflowPolicy, count the
//!                       drop, publish SubscriberOverflow
//! ```
//!
//! ## Rules
//! - **No cross-subscriber ordering**: lanes drain independently
//! - **Per-lane FIFO**: each subscriber sees its surviving events in order
//! - **Overflow is a policy, not an accident**: a full lane drops either
//!   the incoming event (`DropNewest`) or the oldest queued one
//!   (`DropOldest`), per [`Subscribe::overflow_policy`]; every drop is
//!   counted and visible through [`SubscriberSet::stats`]
//! - **Isolation**: a panicking subscriber is reported via
//!   `SubscriberPanicked` and its worker keeps draining

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::{sync::Notify, task::JoinHandle};

use crate::events::{Bus, Event};
use crate::subscribers::{OverflowPolicy, Subscribe};

/// Delivery counters for one subscriber lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStats {
    /// The subscriber's [`Subscribe::name`].
    pub name: &'static str,
    /// Events currently queued and not yet handled.
    pub queued: usize,
    /// Events dropped by the lane's overflow policy since creation.
    pub dropped: u64,
}

/// Bounded ring buffer feeding one subscriber's worker.
struct Lane {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    buf: Mutex<VecDeque<Arc<Event>>>,
    wakeup: Notify,
    closing: AtomicBool,
    dropped: AtomicU64,
}

impl Lane {
    fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Arc<Self> {
        Arc::new(Self {
            name,
            capacity,
            policy,
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            wakeup: Notify::new(),
            closing: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        })
    }

    fn lock_buf(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<Event>>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues an event, applying the overflow policy on a full lane.
    /// Returns the drop reason when something was lost.
    fn offer(&self, ev: Arc<Event>) -> Option<&'static str> {
        if self.closing.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::AcqRel);
            return Some("closed");
        }
        let reason = {
            let mut buf = self.lock_buf();
            let reason = if buf.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::AcqRel);
                        return Some("full");
                    }
                    OverflowPolicy::DropOldest => {
                        buf.pop_front();
                        self.dropped.fetch_add(1, Ordering::AcqRel);
                        Some("evicted")
                    }
                }
            } else {
                None
            };
            buf.push_back(ev);
            reason
        };
        self.wakeup.notify_one();
        reason
    }

    fn drain(&self) -> VecDeque<Arc<Event>> {
        std::mem::take(&mut *self.lock_buf())
    }

    fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.wakeup.notify_one();
    }
}

/// Fan-out coordinator for the group's event subscribers.
///
/// Owns one [`Lane`] and one worker task per subscriber. Publishing is a
/// synchronous buffer push; all subscriber code runs on the workers.
pub struct SubscriberSet {
    lanes: Vec<Arc<Lane>>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates the lanes and spawns one draining worker per subscriber.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut lanes = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let lane = Lane::new(
                sub.name(),
                sub.queue_capacity().max(1),
                sub.overflow_policy(),
            );
            workers.push(Self::spawn_worker(Arc::clone(&lane), sub, bus.clone()));
            lanes.push(lane);
        }

        Self {
            lanes,
            workers,
            bus,
        }
    }

    /// Drains the lane in batches until it is closed and empty.
    ///
    /// Panics inside `on_event` are absorbed with `catch_unwind` and
    /// surfaced as `SubscriberPanicked`; the worker then moves on to the
    /// next queued event.
    fn spawn_worker(lane: Arc<Lane>, sub: Arc<dyn Subscribe>, bus: Bus) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let batch = lane.drain();
                if batch.is_empty() {
                    if lane.closing.load(Ordering::Acquire) {
                        break;
                    }
                    lane.wakeup.notified().await;
                    continue;
                }
                for ev in batch {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic_err) = AssertUnwindSafe(fut).catch_unwind().await {
                        let info = {
                            let any = &*panic_err;
                            if let Some(msg) = any.downcast_ref::<&'static str>() {
                                (*msg).to_string()
                            } else if let Some(msg) = any.downcast_ref::<String>() {
                                msg.clone()
                            } else {
                                "unknown panic".to_string()
                            }
                        };
                        bus.publish(Event::subscriber_panicked(sub.name(), info));
                    }
                }
            }
        })
    }

    /// Emits an event to all lanes (clones the event).
    ///
    /// For hot paths, prefer [`emit_arc`](Self::emit_arc) to avoid cloning.
    pub fn emit(&self, event: &Event) {
        self.emit_arc(Arc::new(event.clone()));
    }

    /// Emits a pre-allocated `Arc<Event>` to all lanes. Returns
    /// immediately; drops are reported via `SubscriberOverflow` unless the
    /// incoming event is itself a delivery diagnostic (prevents event
    /// storms).
    pub fn emit_arc(&self, event: Arc<Event>) {
        let is_internal_event = event.is_subscriber_overflow() || event.is_subscriber_panic();

        for lane in &self.lanes {
            if let Some(reason) = lane.offer(Arc::clone(&event)) {
                if !is_internal_event {
                    self.bus.publish(Event::subscriber_overflow(lane.name, reason));
                }
            }
        }
    }

    /// Delivery counters per lane, in subscriber order.
    pub fn stats(&self) -> Vec<SubscriberStats> {
        self.lanes
            .iter()
            .map(|lane| SubscriberStats {
                name: lane.name,
                queued: lane.lock_buf().len(),
                dropped: lane.dropped.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Gracefully shuts down: closes every lane (queued events still
    /// drain) and awaits the workers.
    pub async fn shutdown(self) {
        for lane in &self.lanes {
            lane.close();
        }
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}
