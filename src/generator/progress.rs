//! Progress Streaming
//!
//! Broadcast progress updates for one generation job. Percent is
//! monotonically non-decreasing within a job; the only exception is the
//! terminal failure event, which reports the stage it failed in.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::ProgressStage;

/// One progress update
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    pub percent: u8,
    pub message: String,
}

/// Broadcast progress reporter with monotonic percent
pub struct ProgressReporter {
    tx: broadcast::Sender<ProgressUpdate>,
    last_percent: Mutex<u8>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            last_percent: Mutex::new(0),
        }
    }

    /// Subscribe to updates; safe to call at any point in the job
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    /// Report progress. Percent is clamped so it never moves backwards,
    /// except on terminal failure which keeps its stage's base percent.
    pub fn report(&self, stage: ProgressStage, percent: u8, message: impl Into<String>) {
        let message = message.into();
        let percent = if stage == ProgressStage::Failed {
            percent
        } else {
            let mut last = self.last_percent.lock().unwrap();
            let clamped = (*last).max(percent).min(100);
            *last = clamped;
            clamped
        };

        debug!(stage = %stage, percent, %message, "Progress");
        // No subscribers is fine; updates are best-effort
        let _ = self.tx.send(ProgressUpdate {
            stage,
            percent,
            message,
        });
    }

    /// Report a stage at its base percent band
    pub fn stage(&self, stage: ProgressStage, message: impl Into<String>) {
        self.report(stage, stage.base_percent(), message);
    }
}
