//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints events to stdout in a human-readable format.
//! This is primarily useful for development, debugging, and examples.
//!
//! ## Output format
//! ```text
//! [spawn-starting] group=myapp attempt=1
//! [attached] group=myapp pid=4021
//! [disabling] group=myapp pid=4021
//! [spawn-failed] group=myapp err="spawn failed (no retry): boot crash"
//! [restarted] group=myapp
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;
use async_trait::async_trait;

/// Simple stdout logging subscriber.
///
/// Not intended for production use - implement a custom [`Subscribe`] for
/// structured logging or metrics collection.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::ProcessAttached => {
                println!("[attached] group={:?} pid={:?}", e.group, e.pid);
            }
            EventKind::ProcessDetached => {
                println!("[detached] group={:?} pid={:?}", e.group, e.pid);
            }
            EventKind::ProcessEnabled => {
                println!("[enabled] group={:?} pid={:?}", e.group, e.pid);
            }
            EventKind::ProcessDisabling => {
                println!("[disabling] group={:?} pid={:?}", e.group, e.pid);
            }
            EventKind::ProcessDisabled => {
                println!("[disabled] group={:?} pid={:?}", e.group, e.pid);
            }
            EventKind::ProcessRotated => {
                println!("[rotated] group={:?} pid={:?}", e.group, e.pid);
            }
            EventKind::SpawnStarting => {
                println!("[spawn-starting] group={:?} attempt={:?}", e.group, e.attempt);
            }
            EventKind::SpawnCompleted => {
                println!("[spawn-completed] group={:?}", e.group);
            }
            EventKind::SpawnFailed => {
                println!("[spawn-failed] group={:?} err={:?}", e.group, e.error);
            }
            EventKind::SpawnRetryScheduled => {
                println!(
                    "[spawn-retry] group={:?} delay={:?} err={:?}",
                    e.group, e.delay, e.error
                );
            }
            EventKind::SpawnCancelled => {
                println!("[spawn-cancelled] group={:?}", e.group);
            }
            EventKind::GroupRestarted => {
                println!("[restarted] group={:?}", e.group);
            }
            EventKind::GroupShutdown => {
                println!("[shutdown] group={:?}", e.group);
            }
            EventKind::SubscriberOverflow
            | EventKind::SubscriberPanicked
            | EventKind::CallbackPanicked => {
                println!("[diag] err={:?}", e.error);
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
