//! Subscriber layer: pluggable event consumers with isolation.
//!
//! - [`Subscribe`]: the handler contract, with per-subscriber lane
//!   capacity and [`OverflowPolicy`]
//! - [`SubscriberSet`]: non-blocking fan-out over bounded delivery lanes,
//!   with drop accounting exposed as [`SubscriberStats`]
//! - [`LogWriter`]: stdout reference subscriber

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::{SubscriberSet, SubscriberStats};
pub use subscribe::{OverflowPolicy, Subscribe};
