//! Webhook payload envelopes (spec §6) and the `WebhookDeliveryRequested`
//! events built from them. Delivery itself (HTTP call, signing, retry) is an
//! external collaborator consuming this queue; this module only shapes the
//! payload.

use std::time::Duration;

use mediaforge_shared::messaging::GatewayEvent;
use mediaforge_shared::model::{MediaArtifact, ResponseFormat, Task, TaskMetadata, TaskType};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl WebhookStatus {
    fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Completed => "completed",
            WebhookStatus::Failed => "failed",
            WebhookStatus::Cancelled => "cancelled",
            WebhookStatus::Retrying => "retrying",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageCompletionWebhookPayload {
    pub task_id: String,
    pub status: WebhookStatus,
    pub image_urls: Option<Vec<String>>,
    pub images_generated: u32,
    pub images_requested: u32,
    pub duration_seconds: f64,
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub response_format: ResponseFormat,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoCompletionWebhookPayload {
    pub task_id: String,
    pub status: WebhookStatus,
    pub video_urls: Option<Vec<String>>,
    pub videos_generated: u32,
    pub videos_requested: u32,
    pub duration_seconds: f64,
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub response_format: ResponseFormat,
    pub error: Option<String>,
}

fn delivery_event(task: &Task, status: WebhookStatus, payload: serde_json::Value) -> Option<GatewayEvent> {
    let url = task.metadata.webhook_url()?.to_string();
    Some(GatewayEvent::WebhookDeliveryRequested {
        task_id: task.id.clone(),
        task_type: task.task_type,
        url,
        event_type: status.as_str().to_string(),
        payload_json: payload,
        headers: task.metadata.webhook_headers().cloned(),
        correlation_id: task.metadata.request().correlation_id.clone(),
    })
}

/// Builds the `WebhookDeliveryRequested` event for a completed task, or
/// `None` if the caller supplied no webhook.
pub(crate) fn completion_event(
    task: &Task,
    artifacts: &[MediaArtifact],
    duration: Duration,
    model: &str,
) -> Option<GatewayEvent> {
    let request = task.metadata.request();
    let urls: Vec<String> = artifacts.iter().map(|a| a.url.clone()).collect();
    let payload = match task.task_type {
        TaskType::Image => serde_json::to_value(ImageCompletionWebhookPayload {
            task_id: task.id.clone(),
            status: WebhookStatus::Completed,
            image_urls: Some(urls),
            images_generated: artifacts.len() as u32,
            images_requested: request.count,
            duration_seconds: duration.as_secs_f64(),
            model: model.to_string(),
            prompt: request.prompt.clone(),
            size: request.size.clone(),
            response_format: request.response_format,
            error: None,
        }),
        TaskType::Video => serde_json::to_value(VideoCompletionWebhookPayload {
            task_id: task.id.clone(),
            status: WebhookStatus::Completed,
            video_urls: Some(urls),
            videos_generated: artifacts.len() as u32,
            videos_requested: request.count,
            duration_seconds: duration.as_secs_f64(),
            model: model.to_string(),
            prompt: request.prompt.clone(),
            size: request.size.clone(),
            response_format: request.response_format,
            error: None,
        }),
        TaskType::Other => return None,
    }
    .ok()?;
    delivery_event(task, WebhookStatus::Completed, payload)
}

/// Builds the failure/retry webhook; `is_retryable` picks between the
/// `Retrying` and `Failed` status values (spec §6's status enum).
pub(crate) fn failure_event(task: &Task, is_retryable: bool) -> Option<GatewayEvent> {
    let request = task.metadata.request();
    let status = if is_retryable {
        WebhookStatus::Retrying
    } else {
        WebhookStatus::Failed
    };
    let error = task.error.clone();
    let payload = match task.task_type {
        TaskType::Image => serde_json::to_value(ImageCompletionWebhookPayload {
            task_id: task.id.clone(),
            status,
            image_urls: None,
            images_generated: 0,
            images_requested: request.count,
            duration_seconds: 0.0,
            model: String::new(),
            prompt: request.prompt.clone(),
            size: request.size.clone(),
            response_format: request.response_format,
            error,
        }),
        TaskType::Video => serde_json::to_value(VideoCompletionWebhookPayload {
            task_id: task.id.clone(),
            status,
            video_urls: None,
            videos_generated: 0,
            videos_requested: request.count,
            duration_seconds: 0.0,
            model: String::new(),
            prompt: request.prompt.clone(),
            size: request.size.clone(),
            response_format: request.response_format,
            error,
        }),
        TaskType::Other => return None,
    }
    .ok()?;
    delivery_event(task, status, payload)
}

pub(crate) fn cancellation_event(task: &Task) -> Option<GatewayEvent> {
    let request = task.metadata.request();
    let payload = match task.task_type {
        TaskType::Image => serde_json::to_value(ImageCompletionWebhookPayload {
            task_id: task.id.clone(),
            status: WebhookStatus::Cancelled,
            image_urls: None,
            images_generated: 0,
            images_requested: request.count,
            duration_seconds: 0.0,
            model: String::new(),
            prompt: request.prompt.clone(),
            size: request.size.clone(),
            response_format: request.response_format,
            error: None,
        }),
        TaskType::Video => serde_json::to_value(VideoCompletionWebhookPayload {
            task_id: task.id.clone(),
            status: WebhookStatus::Cancelled,
            video_urls: None,
            videos_generated: 0,
            videos_requested: request.count,
            duration_seconds: 0.0,
            model: String::new(),
            prompt: request.prompt.clone(),
            size: request.size.clone(),
            response_format: request.response_format,
            error: None,
        }),
        TaskType::Other => return None,
    }
    .ok()?;
    delivery_event(task, WebhookStatus::Cancelled, payload)
}
