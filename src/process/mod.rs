//! Worker process handles and sessions.
//!
//! - [`Process`]: pid, liveness, session accounting, enablement tag
//! - [`Enablement`]: Enabled / Disabling / Disabled
//! - [`Session`]: one in-flight request, with close hooks into the group

mod handle;
mod session;

pub use handle::{Enablement, Process};
pub use session::Session;
