//! # Group configuration.
//!
//! Provides [`GroupOptions`] the effective per-group settings, and
//! [`RequestOptions`] the per-request override subset accepted by
//! [`Group::get`](crate::Group::get).
//!
//! Options are used in three ways:
//! 1. **Group creation**: `GroupBuilder::new(name, options, spawner)`
//! 2. **Per-request merge**: `get()` folds the mutable subset of
//!    [`RequestOptions`] into the group's options
//! 3. **Spawn snapshot**: the spawn driver binds to a clone taken at the
//!    moment `spawn()` fires, so mid-spawn reconfiguration cannot produce
//!    processes that disagree with their siblings
//!
//! ## Sentinel values
//! - `max_processes = 0` → no per-group cap
//! - `spawner_timeout = 0s` → group is never garbage collected
//! - `max_requests = 0` → processes are not rotated by request count

use std::path::PathBuf;
use std::time::Duration;

/// Effective configuration of one process group.
///
/// Identity fields (`app_root`, `app_type`, `app_group_name`) are fixed for
/// the lifetime of the group; changing them means creating a new group.
/// The remaining fields are mutable through the per-request merge.
///
/// `group_secret` is derived by the group itself and handed to spawned
/// processes so they can authenticate callbacks; external overrides are
/// rejected (the builder overwrites whatever the caller put there).
#[derive(Clone, Debug)]
pub struct GroupOptions {
    /// Application root directory; passed through to the spawner.
    pub app_root: PathBuf,
    /// Application type tag (e.g. "rack", "wsgi"); passed to the spawner.
    pub app_type: String,
    /// Logical group name the application registered under.
    pub app_group_name: String,

    /// Floor on the number of enabled processes; the spawn driver keeps
    /// spawning until this many are attached.
    pub min_processes: usize,
    /// Per-group process cap (`0` = uncapped). The disable-last replacement
    /// spawn bypasses this on explicit administrator request.
    pub max_processes: usize,
    /// Per-process request budget; a process is detached and replaced once
    /// it has served this many sessions (`0` = no rotation).
    pub max_requests: u64,
    /// Minimum interval between restart-file stats.
    pub stat_throttle_rate: Duration,
    /// Spawner idle lifetime for garbage collection (`0s` = GC disabled).
    pub spawner_timeout: Duration,
    /// Per-process RSS cap in MB; enforcement lives in the analytics
    /// collector, which reacts by calling [`Group::detach`](crate::Group::detach).
    pub memory_limit: u64,

    /// Touching this file restarts the group once per mtime advance.
    /// Defaults to `<app_root>/tmp/restart.txt`.
    pub restart_file: PathBuf,
    /// While this file exists every `get` restarts the group.
    /// Defaults to `<app_root>/tmp/always_restart.txt`.
    pub always_restart_file: PathBuf,

    /// Opaque token spawned processes use to authenticate callbacks.
    /// Set by the group; caller-supplied values are discarded.
    pub group_secret: String,

    /// Whether per-request analytics are collected for this group.
    pub analytics: bool,
    /// Telemetry routing key, when analytics are on.
    pub union_station_key: Option<String>,
}

impl GroupOptions {
    /// Creates options for an application rooted at `app_root`, with the
    /// restart-file paths derived from it.
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        let app_root = app_root.into();
        let restart_file = app_root.join("tmp").join("restart.txt");
        let always_restart_file = app_root.join("tmp").join("always_restart.txt");
        Self {
            app_root,
            app_type: String::new(),
            app_group_name: String::new(),
            min_processes: 1,
            max_processes: 0,
            max_requests: 0,
            stat_throttle_rate: Duration::from_secs(1),
            spawner_timeout: Duration::from_secs(300),
            memory_limit: 0,
            restart_file,
            always_restart_file,
            group_secret: String::new(),
            analytics: false,
            union_station_key: None,
        }
    }

    /// Folds the mutable subset of a request's overrides into these options.
    ///
    /// Identity fields, restart-file paths, and `group_secret` are never
    /// touched; `noop` is per-request only and is not persisted.
    pub fn merge_request(&mut self, req: &RequestOptions) {
        if let Some(n) = req.min_processes {
            self.min_processes = n;
        }
        if let Some(n) = req.max_requests {
            self.max_requests = n;
        }
        if let Some(d) = req.stat_throttle_rate {
            self.stat_throttle_rate = d;
        }
        if let Some(d) = req.spawner_timeout {
            self.spawner_timeout = d;
        }
        if let Some(n) = req.memory_limit {
            self.memory_limit = n;
        }
        if let Some(b) = req.analytics {
            self.analytics = b;
        }
        if let Some(key) = &req.union_station_key {
            self.union_station_key = Some(key.clone());
        }
    }

    /// Returns the per-group cap as an `Option` (`None` = uncapped).
    #[inline]
    pub fn process_cap(&self) -> Option<usize> {
        if self.max_processes == 0 {
            None
        } else {
            Some(self.max_processes)
        }
    }

    /// Returns the GC idle timeout as an `Option` (`None` = GC disabled).
    #[inline]
    pub fn gc_timeout(&self) -> Option<Duration> {
        if self.spawner_timeout == Duration::ZERO {
            None
        } else {
            Some(self.spawner_timeout)
        }
    }
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self::new(PathBuf::from("."))
    }
}

/// Per-request override subset accepted by `get`.
///
/// Every `Some` field replaces the group's current value before the request
/// is scheduled. `noop` is consumed by the request itself: a noop request
/// never opens a real session, it exists for its wakeup side effects
/// (option merge, restart check, spawn kick).
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub min_processes: Option<usize>,
    pub max_requests: Option<u64>,
    pub stat_throttle_rate: Option<Duration>,
    pub spawner_timeout: Option<Duration>,
    pub memory_limit: Option<u64>,
    pub analytics: Option<bool>,
    pub union_station_key: Option<String>,
    /// Return a dummy session immediately instead of scheduling.
    pub noop: bool,
}

impl RequestOptions {
    /// A request with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// A wakeup-only request: triggers restart checks and spawning but
    /// receives a dummy session.
    pub fn noop() -> Self {
        Self {
            noop: true,
            ..Self::default()
        }
    }
}
