//! Debounced progress reporting shared by the image and video dispatch
//! paths. A reporter owns one `completed` counter; any caller — the
//! artifact pipeline's own `fetch_add`, or a provider's push-progress
//! callback — can advance it, and a background task polls it on a fixed
//! interval, publishing `GenerationProgress` only when the value has moved
//! since the last report.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mediaforge_shared::messaging::{GatewayEvent, MessageClient};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) struct ProgressReporter {
    completed: Arc<AtomicU32>,
    total: u32,
    events: Arc<MessageClient>,
    task_id: String,
    correlation_id: String,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(
        events: Arc<MessageClient>,
        task_id: String,
        correlation_id: String,
        total: u32,
    ) -> Self {
        let completed = Arc::new(AtomicU32::new(0));
        let stop = CancellationToken::new();

        let handle = {
            let completed = completed.clone();
            let events = events.clone();
            let task_id = task_id.clone();
            let correlation_id = correlation_id.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut last_reported = 0u32;
                let mut ticker = tokio::time::interval(POLL_INTERVAL);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            let current = completed.load(Ordering::SeqCst);
                            if current > last_reported {
                                last_reported = current;
                                let event = GatewayEvent::GenerationProgress {
                                    task_id: task_id.clone(),
                                    status: "processing".to_string(),
                                    completed: current,
                                    total,
                                    message: None,
                                    correlation_id: correlation_id.clone(),
                                };
                                if let Err(e) = events.publish_event(event).await {
                                    tracing::warn!(task_id = %task_id, error = %e, "failed to publish progress event");
                                }
                            }
                        }
                    }
                }
            })
        };

        Self {
            completed,
            total,
            events,
            task_id,
            correlation_id,
            stop,
            handle,
        }
    }

    /// The shared counter; pass `&*reporter.counter()` anywhere an
    /// `&AtomicU32` is expected (the artifact pipeline's `process`), or
    /// `fetch_max` into it from a provider's push-progress callback.
    pub fn counter(&self) -> Arc<AtomicU32> {
        self.completed.clone()
    }

    /// Publishes an out-of-band progress event immediately, bypassing the
    /// debounce — used by the video polling fallback's own escalating
    /// schedule, which already rate-limits itself.
    pub async fn ping(&self, message: impl Into<String>) {
        let event = GatewayEvent::GenerationProgress {
            task_id: self.task_id.clone(),
            status: "processing".to_string(),
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total,
            message: Some(message.into()),
            correlation_id: self.correlation_id.clone(),
        };
        if let Err(e) = self.events.publish_event(event).await {
            tracing::warn!(task_id = %self.task_id, error = %e, "failed to publish progress ping");
        }
    }

    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}
