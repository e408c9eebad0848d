//! In-process messaging provider. Backs unit and integration tests that
//! exercise `MessageClient` end-to-end without a real broker, the same role
//! the teacher's `MessagingProvider::new_in_memory()` plays for its own test
//! module.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::super::types::{MessageId, QueueStats, ReceiptHandle};
use super::super::MessagingError;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: MessageId,
    bytes: Vec<u8>,
    enqueued_at: chrono::DateTime<Utc>,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<StoredMessage>,
    in_flight: std::collections::HashMap<String, StoredMessage>,
}

/// `Arc`-wrapped so clones share the same backing queues, mirroring how
/// `MessagingProvider` is shared behind an `Arc` by `MessageClient`.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    queues: Arc<DashMap<String, Mutex<Queue>>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.queues
            .entry(queue_name.to_string())
            .or_insert_with(|| Mutex::new(Queue::default()));
        Ok(())
    }

    pub async fn send_raw(
        &self,
        queue_name: &str,
        bytes: Vec<u8>,
    ) -> Result<MessageId, MessagingError> {
        self.ensure_queue(queue_name).await?;
        let entry = self
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::QueueNotFound(queue_name.to_string()))?;
        let mut queue = entry.lock().await;
        let message_id = MessageId(Uuid::new_v4().to_string());
        queue.ready.push_back(StoredMessage {
            message_id: message_id.clone(),
            bytes,
            enqueued_at: Utc::now(),
            delivery_count: 0,
        });
        Ok(message_id)
    }

    pub async fn receive_raw(
        &self,
        queue_name: &str,
        max_messages: usize,
        _visibility_timeout: Duration,
    ) -> Result<
        Vec<(
            MessageId,
            ReceiptHandle,
            chrono::DateTime<Utc>,
            u32,
            Vec<u8>,
        )>,
        MessagingError,
    > {
        let entry = match self.queues.get(queue_name) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        let mut queue = entry.lock().await;
        let mut out = Vec::new();
        for _ in 0..max_messages {
            let Some(mut msg) = queue.ready.pop_front() else {
                break;
            };
            msg.delivery_count += 1;
            let receipt = ReceiptHandle(Uuid::new_v4().to_string());
            out.push((
                msg.message_id.clone(),
                receipt.clone(),
                msg.enqueued_at,
                msg.delivery_count,
                msg.bytes.clone(),
            ));
            queue.in_flight.insert(receipt.0.clone(), msg);
        }
        Ok(out)
    }

    pub async fn ack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let entry = self
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::QueueNotFound(queue_name.to_string()))?;
        let mut queue = entry.lock().await;
        queue
            .in_flight
            .remove(&receipt_handle.0)
            .map(|_| ())
            .ok_or(MessagingError::MessageNotFound)
    }

    pub async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let entry = self
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::QueueNotFound(queue_name.to_string()))?;
        let mut queue = entry.lock().await;
        let msg = queue
            .in_flight
            .remove(&receipt_handle.0)
            .ok_or(MessagingError::MessageNotFound)?;
        if requeue {
            queue.ready.push_back(msg);
        }
        Ok(())
    }

    pub async fn extend_visibility(
        &self,
        _queue_name: &str,
        _receipt_handle: &ReceiptHandle,
        _extension: Duration,
    ) -> Result<(), MessagingError> {
        // In-memory provider has no visibility timeout to extend; messages
        // stay in-flight until explicitly acked or nacked.
        Ok(())
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let entry = match self.queues.get(queue_name) {
            Some(e) => e,
            None => {
                return Ok(QueueStats {
                    queue_name: queue_name.to_string(),
                    ..Default::default()
                })
            }
        };
        let queue = entry.lock().await;
        let oldest_message_age = queue
            .ready
            .front()
            .map(|m| (Utc::now() - m.enqueued_at).to_std().unwrap_or_default());
        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            approximate_message_count: queue.ready.len() as u64,
            oldest_message_age,
        })
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_receive_round_trips() {
        let provider = InMemoryProvider::new();
        provider.ensure_queue("q1").await.unwrap();
        provider.send_raw("q1", b"hello".to_vec()).await.unwrap();
        let received = provider
            .receive_raw("q1", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].4, b"hello");
    }

    #[tokio::test]
    async fn ack_removes_in_flight_message() {
        let provider = InMemoryProvider::new();
        provider.ensure_queue("q1").await.unwrap();
        provider.send_raw("q1", b"hello".to_vec()).await.unwrap();
        let received = provider
            .receive_raw("q1", 10, Duration::from_secs(30))
            .await
            .unwrap();
        provider.ack("q1", &received[0].1).await.unwrap();

        let again = provider
            .receive_raw("q1", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn nack_with_requeue_makes_message_available_again() {
        let provider = InMemoryProvider::new();
        provider.ensure_queue("q1").await.unwrap();
        provider.send_raw("q1", b"hello".to_vec()).await.unwrap();
        let received = provider
            .receive_raw("q1", 10, Duration::from_secs(30))
            .await
            .unwrap();
        provider
            .nack("q1", &received[0].1, true)
            .await
            .unwrap();

        let again = provider
            .receive_raw("q1", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].3, 2); // delivery_count incremented on redelivery
    }
}
