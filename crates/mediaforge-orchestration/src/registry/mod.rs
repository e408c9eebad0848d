//! Cancellable Task Registry (spec §4.3): a process-local map from task id
//! to a cancellation handle, letting a `GenerationCancelled` event consumed
//! on any worker interrupt in-flight work on whichever worker is actually
//! running it.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Wraps the token rather than exposing it directly so callers go through
/// `cancel()`/`is_cancelled()` instead of cloning the token out of the
/// registry and holding it past the entry's lifetime.
#[derive(Clone)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// `register`/`unregister`/`try_cancel` over a `DashMap`, the teacher
/// workspace's concurrent map for process-local shared mutable state.
#[derive(Default)]
pub struct CancellableTaskRegistry {
    handles: DashMap<String, CancellationHandle>,
}

impl CancellableTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior handle for `id` — a stale entry left by an earlier
    /// attempt on this worker (e.g. after a retry re-dispatch) is discarded
    /// rather than cancelled, since it no longer corresponds to live work.
    pub fn register(&self, id: &str) -> CancellationHandle {
        let handle = CancellationHandle::new();
        self.handles.insert(id.to_string(), handle.clone());
        handle
    }

    /// Callers MUST call this on every exit path of a dispatch.
    pub fn unregister(&self, id: &str) {
        self.handles.remove(id);
    }

    /// Best-effort: `false` only means this worker doesn't hold the handle
    /// for `id`, not that cancellation failed. The caller still transitions
    /// the Task Store to `Cancelled` regardless of this return value.
    pub fn try_cancel(&self, id: &str) -> bool {
        match self.handles.get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_cancel_is_true_only_between_register_and_unregister() {
        let registry = CancellableTaskRegistry::new();
        assert!(!registry.try_cancel("t1"));

        let handle = registry.register("t1");
        assert!(registry.try_cancel("t1"));
        assert!(handle.is_cancelled());

        registry.unregister("t1");
        assert!(!registry.try_cancel("t1"));
    }

    #[test]
    fn register_replaces_stale_handle() {
        let registry = CancellableTaskRegistry::new();
        let first = registry.register("t1");
        let second = registry.register("t1");

        registry.try_cancel("t1");
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = CancellableTaskRegistry::new();
        registry.register("t1");
        registry.unregister("t1");
        registry.unregister("t1");
        assert!(registry.is_empty());
    }

    #[test]
    fn try_cancel_false_does_not_panic_for_unknown_id() {
        let registry = CancellableTaskRegistry::new();
        assert!(!registry.try_cancel("nonexistent"));
    }
}
