//! `InMemoryTaskStore`: a `tokio::sync::Mutex<HashMap<...>>` backend for
//! unit and end-to-end tests that do not need a live Postgres instance.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{Task, TaskType};
use tokio::sync::Mutex;

use super::{apply_mutator, TaskMutator, TaskStore};

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
    archive: Mutex<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> Result<Task, GatewayError> {
        let mut guard = self.tasks.lock().await;
        if guard.contains_key(&task.id) {
            return Err(GatewayError::DuplicateTaskId(task.id));
        }
        guard.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Task, GatewayError> {
        self.tasks
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::TaskNotFound(id.to_string()))
    }

    async fn update(&self, id: &str, mutator: TaskMutator) -> Result<Task, GatewayError> {
        let mut guard = self.tasks.lock().await;
        let current = guard
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::TaskNotFound(id.to_string()))?;
        let updated = apply_mutator(current, mutator)?;
        guard.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        self.tasks.lock().await.remove(id);
        Ok(())
    }

    async fn list_pending(
        &self,
        task_type: Option<TaskType>,
        limit: usize,
    ) -> Result<Vec<Task>, GatewayError> {
        let now = Utc::now();
        let guard = self.tasks.lock().await;
        let mut pending: Vec<Task> = guard
            .values()
            .filter(|t| t.is_ready_for_dispatch(now))
            .filter(|t| task_type.map_or(true, |ty| t.task_type == ty))
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.updated_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn archive_older_than(&self, age: Duration) -> Result<u64, GatewayError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(age).unwrap_or_default();
        let mut tasks = self.tasks.lock().await;
        let mut archive = self.archive.lock().await;
        let to_archive: Vec<String> = tasks
            .values()
            .filter(|t| t.completed_at.map_or(false, |c| c < cutoff))
            .map(|t| t.id.clone())
            .collect();
        let count = to_archive.len() as u64;
        for id in to_archive {
            if let Some(task) = tasks.remove(&id) {
                archive.insert(id, task);
            }
        }
        Ok(count)
    }

    async fn bulk_delete(&self, ids: &[String]) -> Result<u64, GatewayError> {
        let mut archive = self.archive.lock().await;
        let mut count = 0;
        for id in ids {
            if archive.remove(id).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaforge_shared::model::{
        GenerationRequest, ImageTaskMetadata, ResponseFormat, TaskMetadata, TaskState,
    };

    fn sample_task(id: &str) -> Task {
        Task::new(
            id.into(),
            7,
            3,
            TaskMetadata::Image(ImageTaskMetadata {
                request: GenerationRequest {
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

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = InMemoryTaskStore::new();
        store.create(sample_task("t1")).await.unwrap();
        let result = store.create(sample_task("t1")).await;
        assert!(matches!(result, Err(GatewayError::DuplicateTaskId(_))));
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let store = InMemoryTaskStore::new();
        assert!(matches!(
            store.get("missing").await,
            Err(GatewayError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_applies_mutator_and_persists() {
        let store = InMemoryTaskStore::new();
        store.create(sample_task("t1")).await.unwrap();
        let updated = store
            .update(
                "t1",
                Box::new(|t| {
                    t.state = TaskState::Processing;
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.state, TaskState::Processing);
        let reread = store.get("t1").await.unwrap();
        assert_eq!(reread.state, TaskState::Processing);
    }

    #[tokio::test]
    async fn list_pending_excludes_future_retries() {
        let store = InMemoryTaskStore::new();
        store.create(sample_task("t1")).await.unwrap();
        store.create(sample_task("t2")).await.unwrap();
        store
            .update(
                "t2",
                Box::new(|t| {
                    t.next_retry_at = Some(Utc::now() + chrono::Duration::seconds(3600));
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let pending = store.list_pending(None, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "t1");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryTaskStore::new();
        store.create(sample_task("t1")).await.unwrap();
        store.delete("t1").await.unwrap();
        store.delete("t1").await.unwrap();
        assert!(matches!(
            store.get("t1").await,
            Err(GatewayError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn archive_then_bulk_delete_roundtrip() {
        let store = InMemoryTaskStore::new();
        store.create(sample_task("t1")).await.unwrap();
        store
            .update(
                "t1",
                Box::new(|t| {
                    t.state = TaskState::Processing;
                    Ok(())
                }),
            )
            .await
            .unwrap();
        store
            .update(
                "t1",
                Box::new(|t| {
                    t.state = TaskState::Completed;
                    t.result = Some(serde_json::json!({}));
                    Ok(())
                }),
            )
            .await
            .unwrap();
        {
            let mut tasks = store.tasks.lock().await;
            let task = tasks.get_mut("t1").unwrap();
            task.completed_at = Some(Utc::now() - chrono::Duration::days(10));
        }

        let archived = store.archive_older_than(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(archived, 1);
        assert!(matches!(
            store.get("t1").await,
            Err(GatewayError::TaskNotFound(_))
        ));

        let deleted = store.bulk_delete(&["t1".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
    }
}
