//! # poolvisor
//!
//! **Poolvisor** is a process-pool group scheduler.
//!
//! It provides the core of an application pool used by web servers to
//! manage sets of long-lived worker processes: least-usage routing of
//! session requests, supervised background spawning, enable/disable
//! lifecycle with replacement guarantees, and restart-file triggers.
//!
//! ## Features
//!
//! | Area              | Description                                                            | Key types / traits                         |
//! |-------------------|------------------------------------------------------------------------|--------------------------------------------|
//! | **Scheduling**    | Route each request to the least-loaded enabled worker, FIFO waitlists. | [`Group`], [`Session`], [`PriorityIndex`]  |
//! | **Spawning**      | Background spawn loop with cancellation and bounded transient retry.   | [`Spawner`], [`SpawnRetry`], [`BackoffPolicy`] |
//! | **Lifecycle**     | Enable / disable with replacement pre-spawn, restart triggers, GC.     | [`DisableResult`], [`GroupOptions`]        |
//! | **Observability** | Broadcast events with isolated, non-blocking subscribers.              | [`Event`], [`Subscribe`], [`SubscriberSet`] |
//! | **Errors**        | Typed errors for spawning and parked requests.                         | [`SpawnError`], [`GetError`]               |
//! | **Configuration** | Per-group options with a per-request override subset.                  | [`GroupOptions`], [`RequestOptions`]       |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use async_trait::async_trait;
//! use poolvisor::{
//!     GetError, GroupBuilder, GroupOptions, Process, RequestOptions, Session, SpawnError,
//!     Spawner,
//! };
//!
//! struct ForkSpawner;
//!
//! #[async_trait]
//! impl Spawner for ForkSpawner {
//!     async fn spawn(&self, _options: &GroupOptions) -> Result<Arc<Process>, SpawnError> {
//!         // fork/exec the application, wait for its ready report...
//!         Ok(Arc::new(Process::new(4021, 4)))
//!     }
//!
//!     fn last_used(&self) -> Instant {
//!         Instant::now()
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut options = GroupOptions::new("/srv/myapp");
//!     options.min_processes = 2;
//!
//!     let group = GroupBuilder::new("myapp", options, Arc::new(ForkSpawner)).build();
//!
//!     // Hybrid contract: a session comes back synchronously when capacity
//!     // is free; otherwise the callback fires once capacity appears.
//!     let maybe_session = group.get(
//!         RequestOptions::new(),
//!         Box::new(|res: Result<Session, GetError>| {
//!             if let Ok(session) = res {
//!                 // deliver the request, then:
//!                 session.close();
//!             }
//!         }),
//!     );
//!     if let Some(session) = maybe_session {
//!         session.close();
//!     }
//! }
//! ```
//!
//! ---

mod config;
mod error;
mod events;
mod group;
mod policies;
mod process;
mod sched;
mod spawn;
mod subscribers;

// ---- Public re-exports ----

pub use config::{GroupOptions, RequestOptions};
pub use error::{GetError, SpawnError};
pub use events::{Bus, Event, EventKind};
pub use group::{DisableResult, Group, GroupBuilder, GroupSnapshot, PoolContext};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use process::{Enablement, Process, Session};
pub use sched::{DisableCallback, DisableWaiter, GetCallback, GetWaiter, PriorityIndex};
pub use spawn::{SpawnRetry, Spawner};
pub use subscribers::{LogWriter, OverflowPolicy, Subscribe, SubscriberSet, SubscriberStats};
