//! Cost computation seam. Billing itself lives in an external service this
//! core only calls into; `CostCalculator` names that boundary the same way
//! `CredentialValidator` names the caller-credential boundary.

use async_trait::async_trait;
use mediaforge_shared::errors::GatewayError;

use crate::provider_client::UsageRecord;

#[async_trait]
pub trait CostCalculator: Send + Sync {
    async fn compute_cost(
        &self,
        provider_id: &str,
        model: &str,
        usage: &UsageRecord,
    ) -> Result<f64, GatewayError>;
}

/// Flat per-unit pricing, ignorant of `provider_id`/`model`. Useful for
/// local wiring and tests; a real deployment's rate card is an external
/// collaborator.
#[derive(Debug, Clone, Copy)]
pub struct FlatRateCostCalculator {
    pub image_unit_cost: f64,
    pub video_unit_cost_per_second: f64,
}

impl Default for FlatRateCostCalculator {
    fn default() -> Self {
        Self {
            image_unit_cost: 0.04,
            video_unit_cost_per_second: 0.5,
        }
    }
}

#[async_trait]
impl CostCalculator for FlatRateCostCalculator {
    async fn compute_cost(
        &self,
        _provider_id: &str,
        _model: &str,
        usage: &UsageRecord,
    ) -> Result<f64, GatewayError> {
        Ok(match usage {
            UsageRecord::Images { count } => *count as f64 * self.image_unit_cost,
            UsageRecord::Video { duration_seconds, .. } => {
                duration_seconds * self.video_unit_cost_per_second
            }
        })
    }
}
