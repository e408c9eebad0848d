//! Cancelling a task before dispatch picks it up prevents dispatch
//! entirely; cancelling an in-flight task is idempotent and never reaches
//! the provider twice.

mod support;

use std::time::Duration;

use mediaforge_shared::messaging::GatewayEvent;
use mediaforge_shared::model::TaskState;

#[tokio::test]
async fn cancelled_before_dispatch_is_never_sent_to_the_provider() {
    let h = support::build_harness(false, 5);
    h.events.ensure_queue("generation_events").await.unwrap();
    let task = h.store.create(support::image_task("cancel-1", 1)).await.unwrap();

    h.orchestrator
        .handle_generation_cancelled(&task.id, "corr-1")
        .await
        .unwrap();
    let stored = h.store.get("cancel-1").await.unwrap();
    assert_eq!(stored.state, TaskState::Cancelled);

    // A redelivered GenerationRequested for an already-cancelled task is a
    // no-op: the orchestrator's terminal-state guard short-circuits before
    // ever touching the provider.
    h.orchestrator
        .handle_generation_requested(&task.id, "corr-1")
        .await
        .unwrap();
    assert_eq!(h.provider.call_count(), 0);
    let stored = h.store.get("cancel-1").await.unwrap();
    assert_eq!(stored.state, TaskState::Cancelled);
}

#[tokio::test]
async fn cancellation_is_idempotent_and_acknowledged_once_per_delivery() {
    let h = support::build_harness(false, 5);
    h.events.ensure_queue("generation_events").await.unwrap();
    let task = h.store.create(support::image_task("cancel-2", 1)).await.unwrap();

    h.orchestrator
        .handle_generation_cancelled(&task.id, "corr-1")
        .await
        .unwrap();
    h.orchestrator
        .handle_generation_cancelled(&task.id, "corr-1")
        .await
        .unwrap();

    let stored = h.store.get("cancel-2").await.unwrap();
    assert_eq!(stored.state, TaskState::Cancelled);

    let events = h.events.receive_events(50, Duration::from_secs(1)).await.unwrap();
    let acks = events
        .iter()
        .filter(|m| match &m.message {
            GatewayEvent::GenerationProgress { status, .. } => status == "cancelled",
            _ => false,
        })
        .count();
    // Both deliveries acknowledge — cancellation acknowledgement is cheap
    // and idempotent by design, unlike the store transition it follows.
    assert_eq!(acks, 2);
}
