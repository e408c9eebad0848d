//! Messaging service layer: the provider enum, its error type, and the
//! concrete provider implementations under `providers/`.

pub mod providers;
pub mod types;

pub use types::{MessageId, QueueMessage, QueueStats, QueuedMessage, ReceiptHandle};

use std::time::Duration;

use thiserror::Error;

use providers::amqp::AmqpProvider;
use providers::in_memory::InMemoryProvider;

/// Errors surfaced by the messaging layer. Distinct from `GatewayError`
/// because messaging failures are a narrower, transport-specific taxonomy
/// that the orchestrator later folds into `GatewayError::Messaging`.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("circuit breaker open for {component}")]
    CircuitBreakerOpen { component: String },

    #[error("message not found for receipt handle")]
    MessageNotFound,
}

impl MessagingError {
    pub fn circuit_breaker_open(component: impl Into<String>) -> Self {
        MessagingError::CircuitBreakerOpen {
            component: component.into(),
        }
    }
}

/// Queue-name validation shared by every router implementation: lowercase
/// alphanumerics and underscores only, matching the teacher's PGMQ-safe
/// naming constraint and generalized here to the AMQP/in-memory providers.
pub fn validate_queue_name(name: &str) -> Result<(), MessagingError> {
    let valid = !name.is_empty()
        && name.len() <= 200
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MessagingError::InvalidQueueName(name.to_string()))
    }
}

/// Enum-dispatched messaging backend. No trait objects: every provider
/// variant is matched explicitly so hot-path send/receive calls are
/// monomorphized rather than going through a vtable.
#[derive(Debug, Clone)]
pub enum MessagingProvider {
    InMemory(InMemoryProvider),
    Amqp(AmqpProvider),
}

impl MessagingProvider {
    pub fn new_in_memory() -> Self {
        MessagingProvider::InMemory(InMemoryProvider::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            MessagingProvider::InMemory(_) => "in_memory",
            MessagingProvider::Amqp(_) => "amqp",
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        validate_queue_name(queue_name)?;
        match self {
            MessagingProvider::InMemory(p) => p.ensure_queue(queue_name).await,
            MessagingProvider::Amqp(p) => p.ensure_queue(queue_name).await,
        }
    }

    pub async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        for name in queue_names {
            self.ensure_queue(name).await?;
        }
        Ok(())
    }

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| MessagingError::Serialization(e.to_string()))?;
        match self {
            MessagingProvider::InMemory(p) => p.send_raw(queue_name, payload).await,
            MessagingProvider::Amqp(p) => p.send_raw(queue_name, payload).await,
        }
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let raw = match self {
            MessagingProvider::InMemory(p) => {
                p.receive_raw(queue_name, max_messages, visibility_timeout)
                    .await?
            }
            MessagingProvider::Amqp(p) => {
                p.receive_raw(queue_name, max_messages, visibility_timeout)
                    .await?
            }
        };
        raw.into_iter()
            .map(|(message_id, receipt_handle, enqueued_at, delivery_count, bytes)| {
                let message: T = serde_json::from_slice(&bytes)
                    .map_err(|e| MessagingError::Serialization(e.to_string()))?;
                Ok(QueuedMessage {
                    message,
                    message_id,
                    receipt_handle,
                    enqueued_at,
                    delivery_count,
                })
            })
            .collect()
    }

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            MessagingProvider::InMemory(p) => p.ack(queue_name, receipt_handle).await,
            MessagingProvider::Amqp(p) => p.ack(queue_name, receipt_handle).await,
        }
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        match self {
            MessagingProvider::InMemory(p) => p.nack(queue_name, receipt_handle, requeue).await,
            MessagingProvider::Amqp(p) => p.nack(queue_name, receipt_handle, requeue).await,
        }
    }

    pub async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            MessagingProvider::InMemory(p) => {
                p.extend_visibility(queue_name, receipt_handle, extension)
                    .await
            }
            MessagingProvider::Amqp(p) => {
                p.extend_visibility(queue_name, receipt_handle, extension)
                    .await
            }
        }
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        match self {
            MessagingProvider::InMemory(p) => p.queue_stats(queue_name).await,
            MessagingProvider::Amqp(p) => p.queue_stats(queue_name).await,
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            MessagingProvider::InMemory(p) => p.health_check().await,
            MessagingProvider::Amqp(p) => p.health_check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_uppercase_and_punctuation() {
        assert!(validate_queue_name("bad-namespace").is_err());
        assert!(validate_queue_name("bad namespace").is_err());
        assert!(validate_queue_name("bad;DROP TABLE").is_err());
        assert!(validate_queue_name("Upper").is_err());
    }

    #[test]
    fn accepts_lowercase_underscored_names() {
        assert!(validate_queue_name("worker_image_requests").is_ok());
        assert!(validate_queue_name("events").is_ok());
    }
}
