//! Scheduling data structures.
//!
//! - [`PriorityIndex`]: least-usage ordering over enabled processes
//! - [`GetWaiter`] / [`DisableWaiter`]: parked work and its callbacks

mod pqueue;
mod waitlist;

pub use pqueue::PriorityIndex;
pub use waitlist::{
    DisableCallback, DisableWaiter, GetCallback, GetWaiter, PostLockAction,
};
