//! Queue transport: per-step work queues with leases and a redelivery counter.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub mod sqlite;

pub use sqlite::SqliteQueue;

pub const DEFAULT_PIPELINE_PREFIX: &str = "content-pipeline";

/// Name of the live queue a step consumes from.
pub fn queue_name(prefix: &str, step: &str) -> String {
    format!("{}-{}-queue", prefix, step)
}

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{}-dead-letter-queue", queue)
}

/// Queue names are lowercase letters, digits and single hyphens, 3 to 63 characters.
pub fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    let valid = (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");
    if valid {
        Ok(())
    } else {
        Err(QueueError::InvalidName(name.to_string()))
    }
}

/// A message as handed out by [`QueueTransport::receive`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    /// How many times the transport has handed this message out, this delivery included.
    pub dequeue_count: u32,
    /// Proof of the current lease. Invalidated by the next receive or lease change.
    pub pop_receipt: String,
    pub inserted_at: String,
}

/// Queue backend used by the dispatch loops and producers.
pub trait QueueTransport: Send + Sync {
    /// Creates the queue if it does not exist.
    fn ensure_queue(&self, queue: &str) -> Result<(), QueueError>;

    /// Appends a message and returns its id.
    fn send(&self, queue: &str, body: &str) -> Result<String, QueueError>;

    /// Takes the oldest visible message and hides it for `lease`.
    fn receive(&self, queue: &str, lease: Duration) -> Result<Option<QueueMessage>, QueueError>;

    fn delete(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError>;

    /// Hides the message for another `lease` from now. The returned message
    /// carries the new pop receipt.
    fn extend_lease(
        &self,
        queue: &str,
        message: &QueueMessage,
        lease: Duration,
    ) -> Result<QueueMessage, QueueError>;

    /// Number of messages currently visible.
    fn peek_count(&self, queue: &str) -> Result<u64, QueueError>;

    /// Number of messages, leased ones included.
    fn approximate_count(&self, queue: &str) -> Result<u64, QueueError>;
}

/// Copies `message` verbatim to `dead_letter_queue` and removes it from `live_queue`.
pub fn move_to_dead_letter(
    transport: &dyn QueueTransport,
    message: &QueueMessage,
    live_queue: &str,
    dead_letter_queue: &str,
) -> Result<String, QueueError> {
    let dead_id = transport.send(dead_letter_queue, &message.body)?;
    transport.delete(live_queue, message)?;
    log::warn!(
        "Message {} moved from {} to {} after {} deliveries",
        message.id,
        live_queue,
        dead_letter_queue,
        message.dequeue_count
    );
    Ok(dead_id)
}

/// How outgoing message bodies are written. Incoming bodies are always auto-detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    #[default]
    Plain,
    Base64,
}

pub fn encode_body(json: &str, encoding: MessageEncoding) -> String {
    match encoding {
        MessageEncoding::Plain => json.to_string(),
        MessageEncoding::Base64 => STANDARD.encode(json.as_bytes()),
    }
}
