//! Task Store (spec §4.1): durable single source of truth for the Task
//! entity. `TaskStore` is a trait so the in-memory implementation can back
//! unit tests without a live database while `PgTaskStore` is the production
//! backend — the same "trait-plus-concrete-impls" shape the messaging layer
//! uses for `MessagingProvider`.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryTaskStore;
pub use postgres::PgTaskStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{Task, TaskType};

/// A mutation applied to a loaded task before it is written back. Boxed
/// rather than generic so `TaskStore` stays object-safe (`Arc<dyn
/// TaskStore>` is how the orchestrator holds it).
pub type TaskMutator = Box<dyn FnOnce(&mut Task) -> Result<(), GatewayError> + Send>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fails with `DuplicateTaskId` if `id` exists. Writes with
    /// `state = Pending`, `created_at = updated_at = now`, `progress = 0`
    /// (the caller is expected to have constructed the task via
    /// `Task::new`, which already establishes those fields; this just
    /// rejects collisions).
    async fn create(&self, task: Task) -> Result<Task, GatewayError>;

    async fn get(&self, id: &str) -> Result<Task, GatewayError>;

    /// Applies `mutator` to the current task, enforces the transition DAG,
    /// sets `updated_at = now`, and sets `completed_at = now` the first
    /// time the resulting state is terminal. Fails with `IllegalTransition`
    /// if the mutator moved `state` along an edge not present in the DAG.
    async fn update(&self, id: &str, mutator: TaskMutator) -> Result<Task, GatewayError>;

    /// Idempotent: deleting an absent id is not an error.
    async fn delete(&self, id: &str) -> Result<(), GatewayError>;

    /// Pending tasks whose `next_retry_at` is null or `<= now`, ordered by
    /// `updated_at` ascending, used by the crash-recovery sweeper.
    async fn list_pending(
        &self,
        task_type: Option<TaskType>,
        limit: usize,
    ) -> Result<Vec<Task>, GatewayError>;

    /// Moves terminal tasks whose `completed_at` is older than `age` into
    /// the archive partition; returns the number archived.
    async fn archive_older_than(&self, age: Duration) -> Result<u64, GatewayError>;

    /// Prunes the archive partition; returns the number deleted.
    async fn bulk_delete(&self, ids: &[String]) -> Result<u64, GatewayError>;
}

/// Applies the transition DAG check, `updated_at`, `completed_at`, and the
/// `result`/`error` mutual-exclusivity invariant uniformly for every
/// `TaskStore` implementation's `update`. Both backends call this after
/// running the caller's mutator on a cloned copy of the current task.
pub(crate) fn apply_mutator(mut task: Task, mutator: TaskMutator) -> Result<Task, GatewayError> {
    let previous_state = task.state;
    mutator(&mut task)?;

    if task.state != previous_state && !previous_state.can_transition_to(task.state) {
        return Err(GatewayError::IllegalTransition {
            from: previous_state,
            to: task.state,
        });
    }

    task.updated_at = Utc::now();
    if task.state.is_terminal() && task.completed_at.is_none() {
        task.completed_at = Some(task.updated_at);
    }

    if !task.invariant_result_xor_error() {
        return Err(GatewayError::Internal(format!(
            "task {} has both result and error set after mutation",
            task.id
        )));
    }

    Ok(task)
}


#[cfg(test)]
mod apply_mutator_properties {
    use super::*;
    use mediaforge_shared::model::{ImageTaskMetadata, ResponseFormat, TaskMetadata};
    use proptest::prelude::*;

    fn sample_task() -> Task {
        Task::new(
            "t1".into(),
            1,
            3,
            TaskMetadata::Image(ImageTaskMetadata {
                request: mediaforge_shared::model::GenerationRequest {
                    prompt: "a cat".into(),
                    model_alias: "fast-image".into(),
                    count: 1,
                    size: "1024x1024".into(),
                    quality: None,
                    style: None,
                    response_format: ResponseFormat::Url,
                    webhook_url: None,
                    webhook_headers: None,
                    correlation_id: "corr-1".into(),
                },
                caller_credential_hash: "hash".into(),
                webhook_url: None,
                webhook_headers: None,
            }),
        )
    }

    proptest! {
        // Spec §8: "for all tasks, completed_at is set iff state is
        // terminal" and "at any time result and error are not both set" —
        // exercised across every state that legally follows Processing.
        #[test]
        fn completed_at_is_set_exactly_when_terminal(to in prop_oneof![
            Just(TaskState::Completed),
            Just(TaskState::Failed),
            Just(TaskState::Cancelled),
            Just(TaskState::TimedOut),
        ]) {
            let mut task = sample_task();
            task.state = TaskState::Processing;
            let result = apply_mutator(
                task,
                Box::new(move |t| {
                    t.state = to;
                    if to == TaskState::Completed {
                        t.result = Some(serde_json::json!({"ok": true}));
                    } else {
                        t.error = Some("boom".into());
                    }
                    Ok(())
                }),
            )
            .unwrap();
            prop_assert_eq!(result.state.is_terminal(), true);
            prop_assert!(result.completed_at.is_some());
            prop_assert!(result.invariant_result_xor_error());
        }
    }

    #[test]
    fn non_terminal_transition_leaves_completed_at_unset() {
        let task = sample_task();
        let result = apply_mutator(
            task,
            Box::new(|t| {
                t.state = TaskState::Processing;
                Ok(())
            }),
        )
        .unwrap();
        assert!(!result.state.is_terminal());
        assert!(result.completed_at.is_none());
    }
}
