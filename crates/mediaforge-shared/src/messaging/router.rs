//! Queue name routing: resolves a task type or concern to a concrete queue
//! name. Generalizes the teacher's per-namespace worker-queue routing
//! (`worker_{namespace}_queue`) down to the handful of named orchestration
//! queues this core needs: one request queue per task type, one
//! cancellation queue, and one outbound events queue.

use super::service::{validate_queue_name, MessagingError};

pub trait MessageRouter: Send + Sync {
    /// The queue a given task type's `GenerationRequested` events land on.
    /// Default pattern: `{task_type}_requests`.
    fn request_queue(&self, task_type: &str) -> Result<String, MessagingError>;

    /// The single queue carrying `GenerationCancelled` events for every task
    /// type; cancellation is rare enough, and must be delivered promptly
    /// enough, that fanning it out per task type buys nothing.
    fn cancellation_queue(&self) -> String;

    /// The single outbound queue carrying every event the orchestrator
    /// produces (`GenerationStarted`, `GenerationProgress`, ...).
    fn event_queue(&self) -> String;

    /// Reverse of `request_queue`: recover the task type from a queue name.
    fn extract_task_type(&self, queue_name: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct DefaultMessageRouter {
    request_queue_suffix: String,
    cancellation_queue: String,
    event_queue: String,
}

impl DefaultMessageRouter {
    pub fn new(
        request_queue_suffix: impl Into<String>,
        cancellation_queue: impl Into<String>,
        event_queue: impl Into<String>,
    ) -> Self {
        Self {
            request_queue_suffix: request_queue_suffix.into(),
            cancellation_queue: cancellation_queue.into(),
            event_queue: event_queue.into(),
        }
    }
}

impl Default for DefaultMessageRouter {
    fn default() -> Self {
        Self {
            request_queue_suffix: "requests".to_string(),
            cancellation_queue: "generation_cancellations".to_string(),
            event_queue: "generation_events".to_string(),
        }
    }
}

impl MessageRouter for DefaultMessageRouter {
    fn request_queue(&self, task_type: &str) -> Result<String, MessagingError> {
        let name = format!("{task_type}_{}", self.request_queue_suffix);
        validate_queue_name(&name)?;
        Ok(name)
    }

    fn cancellation_queue(&self) -> String {
        self.cancellation_queue.clone()
    }

    fn event_queue(&self) -> String {
        self.event_queue.clone()
    }

    fn extract_task_type(&self, queue_name: &str) -> Option<String> {
        queue_name
            .strip_suffix(&format!("_{}", self.request_queue_suffix))
            .map(String::from)
    }
}

/// Enum dispatch instead of `Arc<dyn MessageRouter>`, matching
/// `MessagingProvider`'s enum-dispatch shape so the messaging layer stays
/// uniformly vtable-free.
#[derive(Debug, Clone)]
pub enum MessageRouterKind {
    Default(DefaultMessageRouter),
}

impl MessageRouterKind {
    pub fn request_queue(&self, task_type: &str) -> Result<String, MessagingError> {
        match self {
            Self::Default(r) => r.request_queue(task_type),
        }
    }

    pub fn cancellation_queue(&self) -> String {
        match self {
            Self::Default(r) => r.cancellation_queue(),
        }
    }

    pub fn event_queue(&self) -> String {
        match self {
            Self::Default(r) => r.event_queue(),
        }
    }

    pub fn extract_task_type(&self, queue_name: &str) -> Option<String> {
        match self {
            Self::Default(r) => r.extract_task_type(queue_name),
        }
    }
}

impl Default for MessageRouterKind {
    fn default() -> Self {
        Self::Default(DefaultMessageRouter::default())
    }
}

impl From<DefaultMessageRouter> for MessageRouterKind {
    fn from(router: DefaultMessageRouter) -> Self {
        Self::Default(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_router_request_queue_names() {
        let router = DefaultMessageRouter::default();
        assert_eq!(router.request_queue("image").unwrap(), "image_requests");
        assert_eq!(router.request_queue("video").unwrap(), "video_requests");
    }

    #[test]
    fn default_router_fixed_queues() {
        let router = DefaultMessageRouter::default();
        assert_eq!(router.cancellation_queue(), "generation_cancellations");
        assert_eq!(router.event_queue(), "generation_events");
    }

    #[test]
    fn extract_task_type_reverses_request_queue() {
        let router = DefaultMessageRouter::default();
        assert_eq!(
            router.extract_task_type("image_requests"),
            Some("image".to_string())
        );
        assert_eq!(router.extract_task_type("generation_events"), None);
    }

    #[test]
    fn request_queue_rejects_invalid_task_type() {
        let router = DefaultMessageRouter::default();
        assert!(router.request_queue("bad-type").is_err());
        assert!(router.request_queue("bad;DROP TABLE").is_err());
    }

    #[test]
    fn router_kind_delegates() {
        let kind = MessageRouterKind::default();
        assert_eq!(kind.request_queue("image").unwrap(), "image_requests");
        assert_eq!(kind.cancellation_queue(), "generation_cancellations");
    }
}
