//! Step progress broadcaster for watching documents move through the pipeline.

use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// What just happened to a message in a step's dispatch loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Received,
    Started,
    Completed,
    Retrying,
    DeadLettered,
    /// The message body could not be read as a pipeline state.
    Rejected,
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepPhase::Received => write!(f, "Received"),
            StepPhase::Started => write!(f, "Started"),
            StepPhase::Completed => write!(f, "Completed"),
            StepPhase::Retrying => write!(f, "Retrying"),
            StepPhase::DeadLettered => write!(f, "Dead-lettered"),
            StepPhase::Rejected => write!(f, "Rejected"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgressEvent {
    /// Empty when the message could not be parsed.
    pub process_id: String,
    pub step: String,
    pub phase: StepPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// `HH:MM:SS.mmm`, set once the handler has returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepProgressEvent {
    pub fn new(process_id: &str, step: &str, phase: StepPhase, message: &str) -> Self {
        Self {
            process_id: process_id.to_string(),
            step: step.to_string(),
            phase,
            message: message.to_string(),
            timestamp: Utc::now(),
            elapsed: None,
            error: None,
        }
    }
}

#[derive(Clone)]
pub struct StepProgressBroadcaster {
    sender: Arc<broadcast::Sender<StepProgressEvent>>,
}

impl StepProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: StepProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepProgressEvent> {
        self.sender.subscribe()
    }

    /// Logs every event on a background thread until all senders are gone.
    /// The thread returns the number of events it logged.
    pub fn spawn_log_forwarder(&self) -> std::io::Result<JoinHandle<usize>> {
        let mut rx = self.subscribe();
        std::thread::Builder::new()
            .name("step-progress-log".to_string())
            .spawn(move || {
                let mut forwarded = 0;
                loop {
                    match rx.blocking_recv() {
                        Ok(event) => {
                            log_event(&event);
                            forwarded += 1;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Progress log skipped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                forwarded
            })
    }

    /// Tracker for one message in `step`.
    pub fn track(&self, process_id: &str, step: &str) -> StepProgressTracker {
        StepProgressTracker {
            process_id: process_id.to_string(),
            step: step.to_string(),
            sender: Some(Arc::clone(&self.sender)),
        }
    }
}

impl Default for StepProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

fn log_event(event: &StepProgressEvent) {
    let error = event.error.as_deref().unwrap_or("");
    match event.phase {
        StepPhase::Completed => log::info!(
            target: "contentflow::progress",
            "{} {} {} in {}",
            event.process_id,
            event.step,
            event.phase,
            event.elapsed.as_deref().unwrap_or("-")
        ),
        StepPhase::Retrying | StepPhase::DeadLettered | StepPhase::Rejected => log::warn!(
            target: "contentflow::progress",
            "{} {} {}: {}",
            event.process_id,
            event.step,
            event.phase,
            error
        ),
        _ => log::debug!(
            target: "contentflow::progress",
            "{} {} {}",
            event.process_id,
            event.step,
            event.phase
        ),
    }
}

/// Emits the events of one message. A detached tracker drops everything.
pub struct StepProgressTracker {
    process_id: String,
    step: String,
    sender: Option<Arc<broadcast::Sender<StepProgressEvent>>>,
}

impl StepProgressTracker {
    pub fn detached(process_id: &str, step: &str) -> Self {
        Self {
            process_id: process_id.to_string(),
            step: step.to_string(),
            sender: None,
        }
    }

    pub fn phase(&self, phase: StepPhase, message: &str) {
        self.emit(StepProgressEvent::new(&self.process_id, &self.step, phase, message));
    }

    pub fn completed(&self, elapsed: &str) {
        let mut event = StepProgressEvent::new(
            &self.process_id,
            &self.step,
            StepPhase::Completed,
            "Step completed",
        );
        event.elapsed = Some(elapsed.to_string());
        self.emit(event);
    }

    pub fn failed(&self, phase: StepPhase, elapsed: Option<&str>, error: &str) {
        let message = match phase {
            StepPhase::DeadLettered => "Moved to dead-letter queue",
            StepPhase::Rejected => "Message rejected",
            _ => "Step failed, will retry",
        };
        let mut event = StepProgressEvent::new(&self.process_id, &self.step, phase, message);
        event.elapsed = elapsed.map(str::to_string);
        event.error = Some(error.to_string());
        self.emit(event);
    }

    fn emit(&self, event: StepProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
