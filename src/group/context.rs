//! # Pool-side services a group consults.
//!
//! The owning pool is outside this crate's scope, but two of its concerns
//! cross the boundary: pool-wide capacity limits (consulted by
//! `should_spawn`) and the non-owning back-reference a group keeps to its
//! container. [`PoolContext`] is the seam for both.

use std::sync::{Mutex, PoisonError, Weak};

/// Services the owning pool provides to its groups.
///
/// Implemented by the container that holds the group. All methods must be
/// cheap and non-blocking: they are called while the group lock is held.
pub trait PoolContext: Send + Sync + 'static {
    /// Whether pool-wide limits currently forbid spawning another process.
    ///
    /// The disable-last replacement spawn and the empty-group spawn ignore
    /// this gate: the former is an explicit administrator request, the
    /// latter is required to resolve parked waiters.
    fn at_capacity(&self) -> bool {
        false
    }
}

/// Thread-safe holder for the group → pool back-reference.
///
/// This tiny mutex is the only lock ever acquired while the group lock is
/// held, and only for reads.
pub(crate) struct PoolBackref {
    inner: Mutex<Weak<dyn PoolContext>>,
}

impl PoolBackref {
    pub(crate) fn empty() -> Self {
        let detached: Weak<dyn PoolContext> = Weak::<Detached>::new();
        Self {
            inner: Mutex::new(detached),
        }
    }

    pub(crate) fn set(&self, pool: Weak<dyn PoolContext>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = pool;
    }

    pub(crate) fn get(&self) -> Option<std::sync::Arc<dyn PoolContext>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }
}

/// Placeholder type for the initial empty backref.
struct Detached;

impl PoolContext for Detached {}
