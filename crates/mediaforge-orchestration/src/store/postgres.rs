//! `PgTaskStore`: the production `TaskStore` backend, against the `tasks`
//! table (plus `tasks_archive`) defined in
//! `mediaforge-orchestration/migrations/0001_create_tasks.sql`, matching the
//! logical schema in spec §6.
//!
//! Uses runtime-checked `sqlx::query`/`query_as` rather than the `query!`
//! compile-time macros, so this crate builds without a live `DATABASE_URL`
//! at compile time (the teacher's own `tasker-shared` falls back to the same
//! style wherever a build-time database isn't guaranteed to be reachable).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{Task, TaskMetadata, TaskState, TaskType};
use sqlx::{FromRow, PgPool, Row};

use super::{apply_mutator, TaskMutator, TaskStore};

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: String,
    task_type: String,
    state: String,
    owner_key_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    progress_percent: i16,
    progress_message: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    error_code: Option<String>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
}

fn state_to_str(state: TaskState) -> &'static str {
    match state {
        TaskState::Pending => "pending",
        TaskState::Processing => "processing",
        TaskState::Completed => "completed",
        TaskState::Failed => "failed",
        TaskState::Cancelled => "cancelled",
        TaskState::TimedOut => "timed_out",
    }
}

fn state_from_str(s: &str) -> Result<TaskState, GatewayError> {
    match s {
        "pending" => Ok(TaskState::Pending),
        "processing" => Ok(TaskState::Processing),
        "completed" => Ok(TaskState::Completed),
        "failed" => Ok(TaskState::Failed),
        "cancelled" => Ok(TaskState::Cancelled),
        "timed_out" => Ok(TaskState::TimedOut),
        other => Err(GatewayError::Internal(format!(
            "unknown task state in database row: {other}"
        ))),
    }
}

fn type_to_str(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Image => "image",
        TaskType::Video => "video",
        TaskType::Other => "other",
    }
}

fn type_from_str(s: &str) -> Result<TaskType, GatewayError> {
    match s {
        "image" => Ok(TaskType::Image),
        "video" => Ok(TaskType::Video),
        "other" => Ok(TaskType::Other),
        other => Err(GatewayError::Internal(format!(
            "unknown task type in database row: {other}"
        ))),
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = GatewayError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let metadata: TaskMetadata = serde_json::from_value(row.metadata)
            .map_err(|e| GatewayError::Internal(format!("corrupt task metadata: {e}")))?;
        Ok(Task {
            id: row.id,
            task_type: type_from_str(&row.task_type)?,
            state: state_from_str(&row.state)?,
            owner_key_id: row.owner_key_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            progress_message: row.progress_message,
            result: row.result,
            error: row.error,
            error_code: row.error_code,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            next_retry_at: row.next_retry_at,
            metadata,
        })
    }
}

fn row_to_task(row: sqlx::postgres::PgRow) -> Result<Task, GatewayError> {
    TaskRow::from_row(&row)
        .map_err(|e| GatewayError::TaskStore(e.to_string()))
        .and_then(Task::try_from)
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: Task) -> Result<Task, GatewayError> {
        let metadata = serde_json::to_value(&task.metadata)
            .map_err(|e| GatewayError::Internal(format!("failed to serialize metadata: {e}")))?;
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, task_type, state, owner_key_id, created_at, updated_at,
                completed_at, progress_percent, progress_message, result, error,
                error_code, retry_count, max_retries, next_retry_at, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&task.id)
        .bind(type_to_str(task.task_type))
        .bind(state_to_str(task.state))
        .bind(task.owner_key_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.completed_at)
        .bind(task.progress_percent as i16)
        .bind(&task.progress_message)
        .bind(&task.result)
        .bind(&task.error)
        .bind(&task.error_code)
        .bind(task.retry_count as i32)
        .bind(task.max_retries as i32)
        .bind(task.next_retry_at)
        .bind(&metadata)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(task),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(GatewayError::DuplicateTaskId(task.id))
            }
            Err(e) => Err(GatewayError::TaskStore(e.to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Task, GatewayError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?
            .ok_or_else(|| GatewayError::TaskNotFound(id.to_string()))?;
        row_to_task(row)
    }

    async fn update(&self, id: &str, mutator: TaskMutator) -> Result<Task, GatewayError> {
        // Single-task writes are serialized by a row lock: the read and the
        // write happen in one transaction, so concurrent updates to the
        // same task id are strictly ordered (spec §4.1 "concurrent updates
        // to the same task are serialized by the store").
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?
            .ok_or_else(|| GatewayError::TaskNotFound(id.to_string()))?;
        let current = row_to_task(row)?;

        let updated = apply_mutator(current, mutator)?;
        let metadata = serde_json::to_value(&updated.metadata)
            .map_err(|e| GatewayError::Internal(format!("failed to serialize metadata: {e}")))?;

        sqlx::query(
            r#"
            UPDATE tasks SET
                state = $2, updated_at = $3, completed_at = $4, progress_percent = $5,
                progress_message = $6, result = $7, error = $8, error_code = $9,
                retry_count = $10, max_retries = $11, next_retry_at = $12, metadata = $13
            WHERE id = $1
            "#,
        )
        .bind(&updated.id)
        .bind(state_to_str(updated.state))
        .bind(updated.updated_at)
        .bind(updated.completed_at)
        .bind(updated.progress_percent as i16)
        .bind(&updated.progress_message)
        .bind(&updated.result)
        .bind(&updated.error)
        .bind(&updated.error_code)
        .bind(updated.retry_count as i32)
        .bind(updated.max_retries as i32)
        .bind(updated.next_retry_at)
        .bind(&metadata)
        .execute(&mut *tx)
        .await
        .map_err(|e| GatewayError::TaskStore(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?;

        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?;
        Ok(())
    }

    async fn list_pending(
        &self,
        task_type: Option<TaskType>,
        limit: usize,
    ) -> Result<Vec<Task>, GatewayError> {
        // Uses the (state, next_retry_at) index named in spec §6.
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE state = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= now())
              AND ($1::text IS NULL OR task_type = $1)
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(task_type.map(type_to_str))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::TaskStore(e.to_string()))?;

        rows.into_iter().map(row_to_task).collect()
    }

    async fn archive_older_than(&self, age: Duration) -> Result<u64, GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?;
        let age_interval = format!("{} seconds", age.as_secs());

        // Uses the (completed_at) index named in spec §6.
        let moved = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM tasks
                WHERE completed_at IS NOT NULL
                  AND completed_at < now() - $1::interval
                RETURNING *
            )
            INSERT INTO tasks_archive SELECT * FROM moved
            "#,
        )
        .bind(&age_interval)
        .execute(&mut *tx)
        .await
        .map_err(|e| GatewayError::TaskStore(e.to_string()))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?;
        Ok(moved)
    }

    async fn bulk_delete(&self, ids: &[String]) -> Result<u64, GatewayError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let affected = sqlx::query("DELETE FROM tasks_archive WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::TaskStore(e.to_string()))?
            .rows_affected();
        Ok(affected)
    }
}
