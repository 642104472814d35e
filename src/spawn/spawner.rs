//! # Spawner contract.
//!
//! The spawner is the external factory that turns application options into
//! ready-to-serve worker processes. The pool core never spawns anything
//! itself; it drives a [`Spawner`] implementation through the `SpawnDriver`
//! background loop.
//!
//! ## Contract
//! - `spawn` may block for as long as an application boot takes; it is
//!   always awaited **outside** the group lock.
//! - Each returned process must carry a pid unique within its group; the
//!   scheduler indexes by pid.
//! - `cleanup` is idempotent teardown of spawner-held resources (preloader
//!   processes, sockets). It runs on a background task.
//! - `last_used` feeds group garbage collection: a group whose spawner has
//!   been idle past `spawner_timeout` and that serves nothing is
//!   collectable.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::GroupOptions;
use crate::error::SpawnError;
use crate::process::Process;

/// External factory producing worker processes for a group.
#[async_trait]
pub trait Spawner: Send + Sync + 'static {
    /// Produces one ready-to-serve process for the given options.
    ///
    /// The options are the group's snapshot at `spawn()` time, including
    /// `group_secret` which the worker needs to authenticate callbacks.
    async fn spawn(&self, options: &GroupOptions) -> Result<Arc<Process>, SpawnError>;

    /// Idempotent teardown of spawner-held resources.
    fn cleanup(&self) {}

    /// When the spawner last produced a process; drives group GC.
    fn last_used(&self) -> Instant;
}
