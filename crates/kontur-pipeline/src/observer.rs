//! Optional presentation hooks.
//!
//! The executor and detector report progress and user-facing messages
//! through an [`Observer`]. Every method defaults to a no-op, and
//! nothing in the pipeline depends on an observer being present.

use std::time::Duration;

/// Receiver for progress and user-message notifications.
pub trait Observer: Send + Sync {
    /// A task with the given description is about to run.
    fn progress_started(&self, description: &str) {
        let _ = description;
    }

    /// The running task finished, successfully or not.
    fn progress_ended(&self) {}

    /// Show `text` to the user for roughly `duration`.
    fn user_message(&self, text: &str, duration: Duration) {
        let _ = (text, duration);
    }
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
