//! Event delivery from a running job to whoever started it.
//!
//! The controller calls into an [`Observer`] from its worker task. The
//! [`ChannelObserver`] turns those calls into an ordered stream of
//! [`RunEvent`]s so the caller can consume them on its own task.

use tokio::sync::mpsc;

use super::models::{JobHandle, Progress, RunOutcome};

/// Receives lifecycle events for one run.
///
/// `on_progress` may be called any number of times; `on_terminal` is called
/// exactly once for every run that passed validation. Implementations take
/// ownership of the outcome; the controller keeps no reference to it.
pub trait Observer: Send + Sync {
    fn on_submitted(&self, _handle: &JobHandle) {}

    fn on_validation_error(&self, message: &str);

    fn on_progress(&self, progress: &Progress);

    fn on_terminal(&self, outcome: RunOutcome);
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    Submitted(JobHandle),
    ValidationFailed(String),
    Progress(Progress),
    Terminal(RunOutcome),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Terminal(_))
    }
}

/// Forwards every event into an unbounded channel, preserving order.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: RunEvent) {
        // Receiver gone means nobody is listening any more; the run still
        // finishes normally.
        let _ = self.tx.send(event);
    }
}

impl Observer for ChannelObserver {
    fn on_submitted(&self, handle: &JobHandle) {
        self.forward(RunEvent::Submitted(handle.clone()));
    }

    fn on_validation_error(&self, message: &str) {
        self.forward(RunEvent::ValidationFailed(message.to_string()));
    }

    fn on_progress(&self, progress: &Progress) {
        self.forward(RunEvent::Progress(progress.clone()));
    }

    fn on_terminal(&self, outcome: RunOutcome) {
        self.forward(RunEvent::Terminal(outcome));
    }
}
