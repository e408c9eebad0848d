//! Shared wire-level types for the messaging layer: message ids, receipt
//! handles, the queued-message envelope, and queue statistics.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Any payload that can travel through a queue.
pub trait QueueMessage: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {}

impl<T> QueueMessage for T where T: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {}

/// Opaque id assigned by the provider when a message is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-delivery token used to ack/nack/extend a specific delivery,
/// distinct from the message id because at-least-once delivery means the
/// same message id can be delivered (and need acking) more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHandle(pub String);

/// A message delivered from a queue, paired with the handle needed to
/// ack/nack it.
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub message: T,
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub enqueued_at: DateTime<Utc>,
    pub delivery_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub queue_name: String,
    pub approximate_message_count: u64,
    pub oldest_message_age: Option<std::time::Duration>,
}
