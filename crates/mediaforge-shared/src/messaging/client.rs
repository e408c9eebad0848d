//! `MessageClient`: domain-level messaging facade wrapping
//! `MessagingProvider` (enum) and `MessageRouterKind` (enum) — no trait
//! objects, all enum dispatch. Optionally wraps send/receive with circuit
//! breaker protection; when the breaker is open, protected operations fail
//! fast with `MessagingError::CircuitBreakerOpen`. Unprotected operations
//! (ack, nack, extend_visibility, health_check, queue management) bypass it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::events::GatewayEvent;
use super::router::MessageRouterKind;
use super::service::{
    MessageId, MessagingError, MessagingProvider, QueueMessage, QueueStats, QueuedMessage,
    ReceiptHandle,
};
use crate::resilience::CircuitBreaker;

#[derive(Debug, Clone)]
pub struct MessageClient {
    provider: Arc<MessagingProvider>,
    router: MessageRouterKind,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl MessageClient {
    pub fn new(provider: Arc<MessagingProvider>, router: MessageRouterKind) -> Self {
        Self {
            provider,
            router,
            circuit_breaker: None,
        }
    }

    pub fn with_circuit_breaker(
        provider: Arc<MessagingProvider>,
        router: MessageRouterKind,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            provider,
            router,
            circuit_breaker: Some(circuit_breaker),
        }
    }

    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    pub fn router(&self) -> &MessageRouterKind {
        &self.router
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    async fn with_breaker<F, T, Fut>(&self, op: F) -> Result<T, MessagingError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, MessagingError>>,
    {
        if let Some(cb) = &self.circuit_breaker {
            if !cb.should_allow() {
                return Err(MessagingError::circuit_breaker_open("messaging"));
            }
            let start = Instant::now();
            let result = op().await;
            match &result {
                Ok(_) => cb.record_success_manual(start.elapsed()),
                Err(_) => cb.record_failure_manual(start.elapsed()),
            }
            result
        } else {
            op().await
        }
    }

    // =========================================================================
    // Domain methods — events (PROTECTED)
    // =========================================================================

    /// Publish a `GenerationRequested` or `GenerationCancelled` event onto
    /// its ingress queue. Callers outside the orchestrator (the ingress
    /// layer, out of scope here) use this to hand off a new task.
    pub async fn publish_request(
        &self,
        task_type: &str,
        event: GatewayEvent,
    ) -> Result<MessageId, MessagingError> {
        let queue = self.router.request_queue(task_type)?;
        let provider = self.provider.clone();
        self.with_breaker(|| async move { provider.send_message(&queue, &event).await })
            .await
    }

    pub async fn receive_requests(
        &self,
        task_type: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<GatewayEvent>>, MessagingError> {
        let queue = self.router.request_queue(task_type)?;
        let provider = self.provider.clone();
        self.with_breaker(|| async move {
            provider
                .receive_messages(&queue, max_messages, visibility_timeout)
                .await
        })
        .await
    }

    pub async fn publish_cancellation(
        &self,
        event: GatewayEvent,
    ) -> Result<MessageId, MessagingError> {
        let queue = self.router.cancellation_queue();
        let provider = self.provider.clone();
        self.with_breaker(|| async move { provider.send_message(&queue, &event).await })
            .await
    }

    pub async fn receive_cancellations(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<GatewayEvent>>, MessagingError> {
        let queue = self.router.cancellation_queue();
        let provider = self.provider.clone();
        self.with_breaker(|| async move {
            provider
                .receive_messages(&queue, max_messages, visibility_timeout)
                .await
        })
        .await
    }

    /// Publish any outbound event (`GenerationStarted`, `GenerationProgress`,
    /// `GenerationCompleted`, `GenerationFailed`, `MediaGenerationCompleted`,
    /// `WebhookDeliveryRequested`, `SpendUpdateRequested`,
    /// `ProviderHealthChanged`, `ModelCapabilitiesDiscovered`) onto the
    /// single outbound events queue.
    pub async fn publish_event(&self, event: GatewayEvent) -> Result<MessageId, MessagingError> {
        let queue = self.router.event_queue();
        let provider = self.provider.clone();
        self.with_breaker(|| async move { provider.send_message(&queue, &event).await })
            .await
    }

    pub async fn receive_events(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<GatewayEvent>>, MessagingError> {
        let queue = self.router.event_queue();
        let provider = self.provider.clone();
        self.with_breaker(|| async move {
            provider
                .receive_messages(&queue, max_messages, visibility_timeout)
                .await
        })
        .await
    }

    // =========================================================================
    // Queue management (UNPROTECTED — admin/startup ops)
    // =========================================================================

    pub async fn initialize_queues(&self, task_types: &[&str]) -> Result<(), MessagingError> {
        let mut queues = Vec::with_capacity(task_types.len() + 2);
        for task_type in task_types {
            queues.push(self.router.request_queue(task_type)?);
        }
        queues.push(self.router.cancellation_queue());
        queues.push(self.router.event_queue());
        self.provider.ensure_queues(&queues).await
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.provider.ensure_queue(queue_name).await
    }

    // =========================================================================
    // Message lifecycle (UNPROTECTED — safe to fail, causes redelivery)
    // =========================================================================

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        self.provider.ack_message(queue_name, receipt_handle).await
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        self.provider
            .nack_message(queue_name, receipt_handle, requeue)
            .await
    }

    pub async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        self.provider
            .extend_visibility(queue_name, receipt_handle, extension)
            .await
    }

    // =========================================================================
    // Queue metrics (UNPROTECTED — observability should work when breaker open)
    // =========================================================================

    pub async fn get_queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        self.provider.queue_stats(queue_name).await
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        self.provider.health_check().await
    }

    // =========================================================================
    // Generic messaging (PROTECTED) — used by the artifact pipeline and
    // webhook dispatch, which publish/consume their own message shapes
    // rather than `GatewayEvent`.
    // =========================================================================

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let provider = self.provider.clone();
        let queue = queue_name.to_string();
        let message = message.clone();
        self.with_breaker(|| async move { provider.send_message(&queue, &message).await })
            .await
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let provider = self.provider.clone();
        let queue = queue_name.to_string();
        self.with_breaker(|| async move {
            provider
                .receive_messages(&queue, max_messages, visibility_timeout)
                .await
        })
        .await
    }
}
