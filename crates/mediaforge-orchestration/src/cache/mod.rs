//! Task Status Cache (spec §4.2): a sub-millisecond hot-path read layered in
//! front of the Task Store, self-healing on miss. Backed by
//! `moka::future::Cache`, the teacher workspace's in-process TTL cache.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mediaforge_shared::config::TaskCacheSettings;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::Task;
use moka::future::Cache;
use moka::Expiry;

/// Cache key scheme from spec §6: `async:task:<task_id>`.
pub fn cache_key(task_id: &str) -> String {
    format!("async:task:{task_id}")
}

#[derive(Clone)]
struct CachedTask {
    task: Task,
    terminal: bool,
}

struct TaskExpiry {
    active: Duration,
    terminal: Duration,
}

impl Expiry<String, CachedTask> for TaskExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedTask,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(if value.terminal {
            self.terminal
        } else {
            self.active
        })
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedTask,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // A re-`put` (e.g. a status flip to terminal) resets the TTL to the
        // tier matching the new state, rather than keeping the original
        // active-tier countdown running.
        Some(if value.terminal {
            self.terminal
        } else {
            self.active
        })
    }
}

/// Non-authoritative hot-path cache for task status. Every write here is
/// expected to have already landed in the Task Store; see `put`'s doc
/// comment for the ordering invariant this relies on.
pub struct TaskStatusCache {
    inner: Cache<String, CachedTask>,
}

impl TaskStatusCache {
    pub fn new(settings: &TaskCacheSettings) -> Self {
        let expiry = TaskExpiry {
            active: Duration::from_secs(settings.active_ttl_seconds),
            terminal: Duration::from_secs(settings.terminal_ttl_seconds),
        };
        let inner = Cache::builder()
            .max_capacity(settings.max_capacity)
            .expire_after(expiry)
            .build();
        Self { inner }
    }

    /// Returns a cache hit, or invokes `fallback` (reading from the Task
    /// Store) on a miss, repopulating the cache with any non-null result
    /// before returning it. `fallback` returning `Ok(None)` means the task
    /// genuinely doesn't exist and is not cached (nothing to self-heal).
    pub async fn get<F, Fut>(&self, id: &str, fallback: F) -> Result<Option<Task>, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Task>, GatewayError>>,
    {
        let key = cache_key(id);
        if let Some(cached) = self.inner.get(&key).await {
            return Ok(Some(cached.task));
        }

        match fallback().await? {
            Some(task) => {
                self.put(&task).await;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Writes with a TTL chosen by `task.state.is_terminal()`. Callers MUST
    /// have already durably written `task` to the Task Store — this method
    /// only ever follows a successful store write, never precedes one (spec
    /// §4.2 "Store write → Cache write" ordering, restated for the event
    /// path in §9's open-question note).
    ///
    /// `moka`'s in-process insert is infallible, so the spec's "a `put` that
    /// fails is logged and swallowed" contract has no failure path to swallow
    /// here; a distributed cache backend (e.g. Redis, as the teacher's own
    /// workspace carries as an alternative) would need that fallback and is
    /// out of scope for this core.
    pub async fn put(&self, task: &Task) {
        let key = cache_key(&task.id);
        self.inner
            .insert(
                key,
                CachedTask {
                    task: task.clone(),
                    terminal: task.state.is_terminal(),
                },
            )
            .await;
    }

    pub async fn invalidate(&self, id: &str) {
        self.inner.invalidate(&cache_key(id)).await;
    }
}

pub type SharedTaskStatusCache = Arc<TaskStatusCache>;
