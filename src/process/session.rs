//! # One in-flight request on one worker process.
//!
//! A [`Session`] is handed out by [`Group::get`](crate::Group::get) (or a
//! drained waiter callback). Its lifecycle hooks feed load changes back into
//! the group scheduler:
//!
//! ```text
//! Session::initiate()  ── process dead ──► Group::on_session_initiate_failure
//! Session::close()     ───────────────► Group::on_session_close
//! (Drop without close behaves like close)
//! ```
//!
//! The wire protocol that moves request/response bytes is out of scope; a
//! session here is the accounting unit the scheduler cares about.

use std::sync::Arc;

use crate::error::GetError;
use crate::process::Process;

/// One in-flight request delegated to one process.
///
/// Closing (explicitly or by drop) returns the load to the group and lets
/// it drain parked waiters. Sessions on a detached process remain valid;
/// their close simply no longer finds a group to notify.
pub struct Session {
    process: Arc<Process>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(process: Arc<Process>) -> Self {
        process.open_session_slot();
        Self {
            process,
            closed: false,
        }
    }

    /// The process serving this session.
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Begins request delivery.
    ///
    /// Fails with [`GetError::ProcessVanished`] when the worker died between
    /// scheduling and initiation; the group is notified so it can detach the
    /// corpse and re-route parked waiters.
    pub fn initiate(&mut self) -> Result<(), GetError> {
        if self.process.is_alive() {
            return Ok(());
        }
        let pid = self.process.pid();
        self.finish(true);
        Err(GetError::ProcessVanished { pid })
    }

    /// Completes the session and returns its slot to the scheduler.
    pub fn close(mut self) {
        self.finish(false);
    }

    fn finish(&mut self, initiate_failed: bool) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.process.close_session_slot();
        if !initiate_failed {
            self.process.record_served();
        }
        if let Some(group) = self.process.group() {
            if initiate_failed {
                group.on_session_initiate_failure(&self.process);
            } else {
                group.on_session_close(&self.process);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.finish(false);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.process.pid())
            .field("closed", &self.closed)
            .finish()
    }
}
