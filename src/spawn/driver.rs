//! # SpawnDriver: background spawn loop.
//!
//! One driver runs per group while `spawning` is true. It repeatedly asks
//! the spawner for a single process and feeds it back into the group, until
//! the group's target is met or the loop dies.
//!
//! ## Architecture
//! ```text
//! Group::spawn() ──► SpawnDriver::run(token)
//!
//! loop {
//!   ├─► check cancellation (fast-path)
//!   ├─► publish SpawnStarting{attempt}
//!   ├─► spawner.spawn(options_snapshot)   (cancellable, outside the lock)
//!   ├─► Ok(process):
//!   │     └─► Group::attach_spawned()
//!   │           ├─► attach + drain disable waitlist
//!   │           ├─► hand sessions to parked get-waiters
//!   │           └─► keep going? (count < min, or waiters still parked)
//!   │                 ├─► yes → iterate
//!   │                 └─► no  → spawning=false, publish SpawnCompleted, exit
//!   ├─► Err(transient) with retries left:
//!   │     └─► publish SpawnRetryScheduled → sleep(backoff) (cancellable)
//!   └─► Err(fatal / retries exhausted / cancelled):
//!         └─► Group::abort_spawn_loop()
//!               ├─► spawning=false
//!               └─► fail every parked get-waiter (backpressure)
//! }
//! ```
//!
//! ## Rules
//! - The driver binds to the **options snapshot** taken when `spawn()`
//!   fired; mid-spawn reconfiguration never produces mismatched siblings.
//! - A cancelled driver still clears `spawning` and drains waiters with a
//!   cancellation error before exiting.
//! - Transient failures retry at most `SpawnRetry::max_retries` times;
//!   exhaustion surfaces the error to waiters instead of retrying forever.

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::config::GroupOptions;
use crate::error::{GetError, SpawnError};
use crate::events::{Event, EventKind};
use crate::group::Group;
use crate::policies::BackoffPolicy;
use std::sync::Arc;

/// Retry budget for transient spawner failures.
///
/// The default is no retry: failures surface to waiters immediately so
/// backpressure reaches the caller. Deployments with a flaky spawner can
/// grant a small budget through
/// [`GroupBuilder::with_spawn_retry`](crate::GroupBuilder::with_spawn_retry).
#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnRetry {
    /// Maximum consecutive transient failures to absorb before giving up.
    pub max_retries: u32,
    /// Delay shaping between retries.
    pub backoff: BackoffPolicy,
}

/// Background loop feeding one group from its spawner.
pub(crate) struct SpawnDriver {
    group: Arc<Group>,
    /// Options snapshot captured at `spawn()` time.
    options: GroupOptions,
    retry: SpawnRetry,
}

impl SpawnDriver {
    pub(crate) fn new(group: Arc<Group>, options: GroupOptions, retry: SpawnRetry) -> Self {
        Self {
            group,
            options,
            retry,
        }
    }

    /// Runs until the group's target is met, a fatal error occurs, or the
    /// token is cancelled.
    pub(crate) async fn run(self, token: CancellationToken) {
        let mut attempt: u64 = 0;
        let mut retries_left = self.retry.max_retries;
        let mut prev_delay = None;

        loop {
            if token.is_cancelled() {
                self.group.abort_spawn_loop(GetError::Cancelled);
                return;
            }

            attempt += 1;
            self.group.bus().publish(
                Event::now(EventKind::SpawnStarting)
                    .with_group(self.group.name())
                    .with_attempt(attempt),
            );

            let res = select! {
                res = self.group.spawner().spawn(&self.options) => res,
                _ = token.cancelled() => Err(SpawnError::Cancelled),
            };

            match res {
                Ok(process) => {
                    retries_left = self.retry.max_retries;
                    prev_delay = None;
                    if !self.group.attach_spawned(process, &self.options) {
                        return;
                    }
                }
                Err(SpawnError::Cancelled) => {
                    self.group.abort_spawn_loop(GetError::Cancelled);
                    return;
                }
                Err(e) if e.is_retryable() && retries_left > 0 => {
                    retries_left -= 1;
                    let delay = self.retry.backoff.next(prev_delay);
                    prev_delay = Some(delay);
                    self.group.bus().publish(
                        Event::now(EventKind::SpawnRetryScheduled)
                            .with_group(self.group.name())
                            .with_attempt(attempt)
                            .with_delay(delay)
                            .with_error(e.to_string()),
                    );
                    let sleep = time::sleep(delay);
                    tokio::pin!(sleep);
                    select! {
                        _ = &mut sleep => {}
                        _ = token.cancelled() => {
                            self.group.abort_spawn_loop(GetError::Cancelled);
                            return;
                        }
                    }
                }
                Err(e) => {
                    self.group.abort_spawn_loop(GetError::SpawnFailed(e));
                    return;
                }
            }
        }
    }
}
