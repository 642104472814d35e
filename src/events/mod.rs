//! Event system: domain events and the broadcast bus.
//!
//! - [`Event`] / [`EventKind`]: what happened, with ordering metadata
//! - [`Bus`]: bounded broadcast channel the runtime publishes into

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
