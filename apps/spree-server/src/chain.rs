use spree_sdk::{ClaimExecution, ExecutionLookup, Result, SpreeError};
use tracing::warn;

/// Chain reader for deployments without a full-node endpoint. Every reported
/// claim is refused with 503 rather than recorded unverified.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainUnavailable;

impl ExecutionLookup for ChainUnavailable {
    async fn claim_execution(&self, digest: &str) -> Result<Option<ClaimExecution>> {
        warn!(digest, "claim reported but no chain reader is configured");
        Err(SpreeError::Unavailable("transaction lookup is not configured".into()))
    }
}
