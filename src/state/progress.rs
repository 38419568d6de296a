//! Progress reporting for update runs

use crate::crawler::send_or_cancel;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An event describing how far an update run has come
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Discovery is about to begin
    Start,

    /// A milestone was reached while persisting tools
    Progress {
        slug: Option<String>,
        processed: usize,
        total: usize,
    },

    /// The run finished
    Complete { processed: usize, total: usize },

    /// The run ended without completing
    Error { cause: String },
}

/// Sends progress events to an optional, caller-supplied channel
///
/// Every event follows the same policy: it is delivered immediately when the
/// channel has room, otherwise the send waits until there is room or the token
/// is cancelled. A reporter without a channel drops events silently.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Option<mpsc::Sender<ProgressEvent>>,
    token: CancellationToken,
}

impl ProgressReporter {
    pub fn new(sender: Option<mpsc::Sender<ProgressEvent>>, token: CancellationToken) -> Self {
        Self { sender, token }
    }

    /// A reporter that discards every event
    pub fn disabled() -> Self {
        Self::new(None, CancellationToken::new())
    }

    pub async fn emit(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        if send_or_cancel(sender, event, &self.token).await.is_err() {
            tracing::trace!("Progress event dropped (receiver gone or run cancelled)");
        }
    }
}

/// Decides when a `Progress` event is worth sending
///
/// A milestone is every `every`-th tool plus every whole-percent change.
#[derive(Debug)]
pub struct Milestones {
    total: usize,
    every: usize,
    last_percent: usize,
}

impl Milestones {
    pub fn new(total: usize, every: usize) -> Self {
        Self {
            total,
            every: every.max(1),
            last_percent: 0,
        }
    }

    /// Returns true if `processed` is a milestone
    pub fn reached(&mut self, processed: usize) -> bool {
        if self.total == 0 {
            return false;
        }

        let percent = processed * 100 / self.total;
        let crossed = percent > self.last_percent;
        if crossed {
            self.last_percent = percent;
        }

        crossed || processed % self.every == 0
    }
}
