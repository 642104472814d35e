//! # Builder wiring a group and its runtime components.

use std::sync::{Arc, Weak};

use rand::{distr::Alphanumeric, Rng};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::GroupOptions;
use crate::events::Bus;
use crate::group::context::PoolContext;
use crate::group::core::Group;
use crate::spawn::{SpawnRetry, Spawner};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Length of the generated callback-authentication secret.
const SECRET_LEN: usize = 32;

/// Builder for constructing a [`Group`] with optional features.
///
/// Requires an active tokio runtime: `build()` launches subscriber workers
/// and the group later launches spawn drivers.
pub struct GroupBuilder {
    name: String,
    options: GroupOptions,
    spawner: Arc<dyn Spawner>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    bus_capacity: usize,
    retry: SpawnRetry,
    pool: Option<Weak<dyn PoolContext>>,
}

impl GroupBuilder {
    /// Creates a builder for a group named `name`, serving the application
    /// described by `options`, fed by `spawner`.
    pub fn new(
        name: impl Into<String>,
        options: GroupOptions,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            spawner,
            subscribers: Vec::new(),
            bus_capacity: 1024,
            retry: SpawnRetry::default(),
            pool: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (process lifecycle, spawn
    /// progress, failures) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the event bus ring-buffer capacity (clamped to >= 1).
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Grants the spawn driver a transient-failure retry budget.
    pub fn with_spawn_retry(mut self, retry: SpawnRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Installs the owning pool's back-reference and capacity gate.
    pub fn with_pool(mut self, pool: Weak<dyn PoolContext>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Builds the group and starts its subscriber workers.
    pub fn build(self) -> Arc<Group> {
        let secret: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LEN)
            .map(char::from)
            .collect();

        let mut options = self.options;
        options.group_secret = secret.clone();

        let bus = Bus::new(self.bus_capacity);
        let runtime_token = CancellationToken::new();
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        if !subs.is_empty() {
            Self::spawn_fanout_listener(&bus, &subs, runtime_token.clone());
        }

        let group = Group::new_internal(
            self.name,
            secret,
            options,
            self.spawner,
            bus,
            self.retry,
            runtime_token,
            subs,
        );
        if let Some(pool) = self.pool {
            group.set_pool(pool);
        }
        group
    }

    /// Forwards every bus event into the subscriber set.
    ///
    /// Runs until the group shuts down or the bus closes; lagged
    /// receivers skip old events rather than stalling.
    fn spawn_fanout_listener(bus: &Bus, subs: &Arc<SubscriberSet>, token: CancellationToken) {
        let mut rx = bus.subscribe();
        let set = Arc::clone(subs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit_arc(Arc::new(ev)),
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        });
    }
}
