//! The Task entity: the durable record of one asynchronous generation request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::GenerationRequest;

/// Discriminates the two orchestration flavors. `Other` is reserved for
/// future task types that share the same store/cache/registry plumbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Image,
    Video,
    Other,
}

/// Positions in the state DAG from spec §4.1:
/// `Pending -> Processing -> (Completed | Failed | Cancelled | TimedOut)`,
/// with a retry path `Failed -> Pending` and `Processing -> Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskState {
    /// Terminal states are sinks except for the retry path out of `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled | TaskState::TimedOut
        )
    }

    /// Whether `self -> next` is a legal edge in the state DAG.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (*self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, TimedOut)
                | (Processing, Pending) // retry scheduling mid-flight
                | (Failed, Pending) // retry
                | (Pending, Cancelled) // cancellation before dispatch picks it up
        )
    }
}

/// Typed per-task-type metadata (spec §9 "Dynamic metadata dictionaries"
/// redesign: a sum type replacing a loosely-typed bag), serialized with an
/// internally-tagged `type` discriminant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskMetadata {
    Image(ImageTaskMetadata),
    Video(VideoTaskMetadata),
}

impl TaskMetadata {
    pub fn request(&self) -> &GenerationRequest {
        match self {
            TaskMetadata::Image(m) => &m.request,
            TaskMetadata::Video(m) => &m.request,
        }
    }

    pub fn caller_credential_hash(&self) -> &str {
        match self {
            TaskMetadata::Image(m) => &m.caller_credential_hash,
            TaskMetadata::Video(m) => &m.caller_credential_hash,
        }
    }

    pub fn webhook_url(&self) -> Option<&str> {
        match self {
            TaskMetadata::Image(m) => m.webhook_url.as_deref(),
            TaskMetadata::Video(m) => m.webhook_url.as_deref(),
        }
    }

    pub fn webhook_headers(&self) -> Option<&serde_json::Value> {
        match self {
            TaskMetadata::Image(m) => m.webhook_headers.as_ref(),
            TaskMetadata::Video(m) => m.webhook_headers.as_ref(),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskMetadata::Image(_) => TaskType::Image,
            TaskMetadata::Video(_) => TaskType::Video,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageTaskMetadata {
    pub request: GenerationRequest,
    pub caller_credential_hash: String,
    pub webhook_url: Option<String>,
    pub webhook_headers: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTaskMetadata {
    pub request: GenerationRequest,
    pub caller_credential_hash: String,
    pub webhook_url: Option<String>,
    pub webhook_headers: Option<serde_json::Value>,
    /// Last-known provider-push progress cursor, used by the polling
    /// fallback described in spec §4.4(a) when a provider offers no push
    /// callback.
    pub last_progress_cursor: Option<u32>,
}

/// The durable record of one asynchronous generation request (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub state: TaskState,
    pub owner_key_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percent: u8,
    pub progress_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub metadata: TaskMetadata,
}

impl Task {
    pub fn new(id: String, owner_key_id: i64, max_retries: u32, metadata: TaskMetadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            task_type: metadata.task_type(),
            state: TaskState::Pending,
            owner_key_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
            progress_percent: 0,
            progress_message: None,
            result: None,
            error: None,
            error_code: None,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            metadata,
        }
    }

    /// Invariant: a retry-eligible Pending task MUST NOT be picked up before
    /// its `next_retry_at` instant.
    pub fn is_ready_for_dispatch(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.next_retry_at.map_or(true, |t| t <= now)
    }

    /// Invariant: `result` and `error` are mutually exclusive.
    pub fn invariant_result_xor_error(&self) -> bool {
        !(self.result.is_some() && self.error.is_some())
    }
}


#[cfg(test)]
mod state_dag_properties {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = TaskState> {
        prop_oneof![
            Just(TaskState::Pending),
            Just(TaskState::Processing),
            Just(TaskState::Completed),
            Just(TaskState::Failed),
            Just(TaskState::Cancelled),
            Just(TaskState::TimedOut),
        ]
    }

    proptest! {
        // Spec §8: "for all tasks, state transitions are in the legal DAG
        // and completed_at is set iff state is terminal" — here restricted
        // to the transition-legality half; `apply_mutator` covers the
        // completed_at half against a live store.
        #[test]
        fn terminal_states_never_accept_arbitrary_transitions(from in any_state(), to in any_state()) {
            if from.is_terminal() && from != TaskState::Failed {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn every_legal_edge_leaves_a_non_terminal_or_is_the_failed_retry_path(
            from in any_state(),
            to in any_state(),
        ) {
            if from.can_transition_to(to) {
                prop_assert!(!from.is_terminal() || (from == TaskState::Failed && to == TaskState::Pending));
            }
        }
    }
}
