//! # Waitlists: parked work awaiting group capacity.
//!
//! Two FIFO queues live inside the group state:
//!
//! - the **get waitlist**: session requests that could not be satisfied
//!   immediately (no process yet, or every enabled process saturated);
//! - the **disable waitlist**: acknowledgement callbacks for `disable`
//!   requests that are pending a replacement spawn. The same process may
//!   appear multiple times here, once per pending request.
//!
//! Both are drained under the group lock, with the callbacks themselves
//! deferred into a post-lock action list so user code never runs while the
//! lock is held.

use std::sync::Arc;

use crate::config::RequestOptions;
use crate::error::GetError;
use crate::process::{Process, Session};

/// Callback a parked `get` is resolved with, exactly once.
pub type GetCallback = Box<dyn FnOnce(Result<Session, GetError>) + Send + 'static>;

/// Acknowledgement for a pending `disable`; firing it is the ack, whether
/// the process settled to disabled or vanished first.
pub type DisableCallback = Box<dyn FnOnce() + Send + 'static>;

/// Deferred user-visible work, run in order after the group lock is
/// released.
pub type PostLockAction = Box<dyn FnOnce() + Send + 'static>;

/// An unresolved `get` parked on the group.
pub struct GetWaiter {
    /// The request's options, retained so late-resolved requests keep
    /// their per-request context.
    pub options: RequestOptions,
    pub callback: GetCallback,
}

impl GetWaiter {
    pub fn new(options: RequestOptions, callback: GetCallback) -> Self {
        Self { options, callback }
    }
}

/// A pending disable acknowledgement keyed to one process.
pub struct DisableWaiter {
    pub process: Arc<Process>,
    pub callback: DisableCallback,
}

impl DisableWaiter {
    pub fn new(process: Arc<Process>, callback: DisableCallback) -> Self {
        Self { process, callback }
    }
}
