//! Error taxonomy for the orchestration core.
//!
//! `GatewayError` is the single typed error surfaced across task-store,
//! discovery, and orchestrator boundaries. It classifies into retryable vs.
//! non-retryable per spec, preferring a structured `kind` over message
//! substring matching; substring matching is retained only as a documented
//! fallback for errors that arrive from below the orchestrator boundary
//! already flattened to a string (e.g. a provider client that only returns
//! `anyhow::Error`).

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the orchestration core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed request or bad parameters. Non-retryable.
    #[error("validation error: {0}")]
    Validation(String),

    /// Credential disabled or not permitted for the requested model. Non-retryable.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Alias not present in the model mapping store. Non-retryable.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Mapping exists but lacks the requested capability. Non-retryable.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// Provider disabled or has no enabled credential. Non-retryable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider's circuit breaker is open (spec §4.4 step 4). Distinct
    /// from `ProviderUnavailable` because this one is expected to clear on
    /// its own once the breaker's recovery timeout elapses: retryable.
    #[error("provider circuit open: {0}")]
    CircuitOpen(String),

    /// Timeout, connection reset, 5xx, or rate-limit from an upstream provider. Retryable.
    #[error("transient provider error: {0}")]
    ProviderTransient(String),

    /// 4xx (other than rate-limit) or content-policy rejection. Non-retryable.
    #[error("permanent provider error: {0}")]
    ProviderPermanent(String),

    /// Storage failure expected to clear on retry (timeout, connection reset). Retryable.
    #[error("transient storage error: {0}")]
    StorageTransient(String),

    /// Storage failure that will not clear on retry (permissions, bad request). Non-retryable.
    #[error("permanent storage error: {0}")]
    StoragePermanent(String),

    /// Caller-induced cancellation. Not counted as a failure.
    #[error("cancelled")]
    Cancelled,

    /// A durable-store failure. Surfaced rather than recovered, because
    /// correctness depends on the store.
    #[error("task store error: {0}")]
    TaskStore(String),

    /// `create` was called with an id that already exists (spec §4.1).
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    /// `get`/`update` referenced a task id that does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// `update` attempted an edge not present in the state DAG (spec §4.1).
    #[error("illegal task transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: crate::model::TaskState,
        to: crate::model::TaskState,
    },

    /// A messaging-transport failure.
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Internal invariant violation. Non-retryable; recorded and surfaced.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Whether an error kind should be retried, and how that was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Retryable,
    NonRetryable,
}

/// Message substrings that indicate a retryable condition when the error
/// arrives without a structured kind (e.g. already flattened to text by a
/// provider SDK). Checked case-insensitively. This is a fallback path only —
/// prefer `GatewayError::classify` wherever a structured kind is available.
pub const RETRYABLE_MESSAGE_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "temporarily unavailable",
    "service unavailable",
    "too many requests",
    "rate limit",
];

impl GatewayError {
    /// Classify by structured kind first; this is the path that should be
    /// used wherever possible per the design note in spec §9.
    pub fn classify(&self) -> Retryability {
        use Retryability::*;
        match self {
            GatewayError::ProviderTransient(_)
            | GatewayError::StorageTransient(_)
            | GatewayError::CircuitOpen(_) => Retryable,
            GatewayError::Validation(_)
            | GatewayError::Authorization(_)
            | GatewayError::ModelNotFound(_)
            | GatewayError::UnsupportedCapability(_)
            | GatewayError::ProviderUnavailable(_)
            | GatewayError::ProviderPermanent(_)
            | GatewayError::StoragePermanent(_)
            | GatewayError::TaskStore(_)
            | GatewayError::DuplicateTaskId(_)
            | GatewayError::TaskNotFound(_)
            | GatewayError::IllegalTransition { .. }
            | GatewayError::Messaging(_)
            | GatewayError::Internal(_) => NonRetryable,
            GatewayError::Cancelled => NonRetryable,
        }
    }

    /// Fallback classification by message substring, documented in spec §7.
    /// Only meaningful for errors that did not originate as a `GatewayError`
    /// variant (e.g. an upstream SDK's flattened string).
    pub fn classify_message(message: &str) -> Retryability {
        let lower = message.to_lowercase();
        if RETRYABLE_MESSAGE_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
        {
            Retryability::Retryable
        } else {
            Retryability::NonRetryable
        }
    }

    /// The stable `error_code` surfaced on terminal tasks and webhook payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Authorization(_) => "authorization_error",
            GatewayError::ModelNotFound(_) => "model_not_found",
            GatewayError::UnsupportedCapability(_) => "unsupported_capability",
            GatewayError::ProviderUnavailable(_) => "provider_unavailable",
            GatewayError::CircuitOpen(_) => "provider_circuit_open",
            GatewayError::ProviderTransient(_) => "provider_transient_error",
            GatewayError::ProviderPermanent(_) => "provider_permanent_error",
            GatewayError::StorageTransient(_) => "storage_transient_error",
            GatewayError::StoragePermanent(_) => "storage_permanent_error",
            GatewayError::Cancelled => "cancelled",
            GatewayError::TaskStore(_) => "internal",
            GatewayError::DuplicateTaskId(_) => "duplicate_task_id",
            GatewayError::TaskNotFound(_) => "task_not_found",
            GatewayError::IllegalTransition { .. } => "illegal_transition",
            GatewayError::Messaging(_) => "internal",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Human-readable text for terminal tasks and webhook payloads.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Crate-wide `Result` alias.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Retry policy used both by the task store's backoff scheduler and any
/// caller computing `next_retry_at` independently (e.g. tests).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    pub const DEFAULT_IMAGE: RetryPolicy = RetryPolicy {
        base: Duration::from_secs(30),
        max: Duration::from_secs(3600),
        jitter_fraction: 0.2,
    };

    /// Video retries use a distinct, more conservative configuration because
    /// upstream charges may be higher per attempt (spec §4.4(b)).
    pub const DEFAULT_VIDEO: RetryPolicy = RetryPolicy {
        base: Duration::from_secs(60),
        max: Duration::from_secs(3600),
        jitter_fraction: 0.2,
    };

    /// `next_retry_at = now + base * 2^retry_count`, bounded by `max`, with
    /// uniform jitter of `±jitter_fraction`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = 2u64.saturating_pow(retry_count);
        let raw = self.base.saturating_mul(exp as u32).min(self.max);
        if self.jitter_fraction <= 0.0 {
            return raw;
        }
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * self.jitter_fraction;
        let factor = (1.0 + jitter).max(0.0);
        Duration::from_secs_f64((raw.as_secs_f64() * factor).min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_taxonomy() {
        assert_eq!(
            GatewayError::ProviderTransient("x".into()).classify(),
            Retryability::Retryable
        );
        assert_eq!(
            GatewayError::ProviderPermanent("x".into()).classify(),
            Retryability::NonRetryable
        );
        assert_eq!(
            GatewayError::Validation("x".into()).classify(),
            Retryability::NonRetryable
        );
    }

    #[test]
    fn classify_message_fallback() {
        assert_eq!(
            GatewayError::classify_message("Connection RESET by peer"),
            Retryability::Retryable
        );
        assert_eq!(
            GatewayError::classify_message("invalid prompt: empty"),
            Retryability::NonRetryable
        );
    }

    #[test]
    fn backoff_respects_max_and_monotonic_growth_without_jitter() {
        let policy = RetryPolicy {
            base: Duration::from_secs(30),
            max: Duration::from_secs(3600),
            jitter_fraction: 0.0,
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(30));
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        // Large retry counts clamp to max rather than overflowing.
        assert_eq!(policy.backoff(20), Duration::from_secs(3600));
    }

    #[test]
    fn backoff_jitter_stays_non_negative_and_bounded() {
        let policy = RetryPolicy::DEFAULT_IMAGE;
        for retry in 0..5 {
            let d = policy.backoff(retry);
            assert!(d <= policy.max);
        }
    }
}

#[cfg(test)]
mod backoff_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Spec §8: "for all tasks on the retry path, next_retry_at >
        // updated_at" — the scheduled delay must always be strictly
        // positive and never exceed the configured max, for any retry
        // count and any jitter fraction in the valid range.
        #[test]
        fn backoff_is_positive_and_never_exceeds_max(
            retry_count in 0u32..64,
            jitter_fraction in 0.0f64..1.0,
        ) {
            let policy = RetryPolicy {
                base: Duration::from_secs(30),
                max: Duration::from_secs(3600),
                jitter_fraction,
            };
            let delay = policy.backoff(retry_count);
            prop_assert!(delay > Duration::ZERO);
            prop_assert!(delay <= policy.max);
        }

        #[test]
        fn zero_jitter_backoff_is_exactly_exponential_until_the_cap(retry_count in 0u32..6) {
            let policy = RetryPolicy {
                base: Duration::from_secs(30),
                max: Duration::from_secs(3600),
                jitter_fraction: 0.0,
            };
            let expected = Duration::from_secs(30 * 2u64.pow(retry_count));
            prop_assert_eq!(policy.backoff(retry_count), expected.min(policy.max));
        }
    }
}
