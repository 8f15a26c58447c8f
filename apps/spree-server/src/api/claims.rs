use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use spree_sdk::{
    finalize_reported_claim, AdminStore, ClaimKind, ClaimReceipt, ExecutionLookup, ReportedClaim,
    WalletAddress,
};
use tracing::warn;

use super::error::ApiResult;
use crate::state::AppState;

/// Digest of a claim the client's wallet executed: `{"kind": "tokens", "digest": "..."}`.
///
/// Nothing else in the body is trusted; the transaction and its status are
/// read back from the chain.
#[derive(Debug, Deserialize)]
pub struct ClaimSubmission {
    pub kind: ClaimKind,
    pub digest: String,
}

/// Finalizing step of a claim. Records are only touched when the digest
/// resolves to this wallet's successful distributor call and the account is
/// still eligible; resubmitting a recorded digest reports `amount: 0`.
pub async fn finalize<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Path(wallet): Path<String>,
    Json(body): Json<ClaimSubmission>,
) -> ApiResult<Json<ClaimReceipt>> {
    let wallet = WalletAddress::parse(&wallet)?;
    let settings = state.settings.get().await?;
    let report = ReportedClaim { kind: body.kind, wallet: &wallet, digest: &body.digest };

    let result = finalize_reported_claim(
        &*state.store,
        &*state.chain,
        &state.distributor,
        &settings,
        report,
        Utc::now(),
    )
    .await;
    let kind = match body.kind {
        ClaimKind::Tokens => "tokens",
        ClaimKind::ReferralBonuses => "referral_bonuses",
    };
    match result {
        Ok(receipt) => {
            counter!("claims_finalized_total", "kind" => kind).increment(1);
            Ok(Json(receipt))
        }
        Err(err) => {
            counter!("claims_failed_total", "kind" => kind).increment(1);
            warn!(
                wallet = %wallet.short(),
                digest = %body.digest,
                error = %err,
                "claim not finalized"
            );
            Err(err.into())
        }
    }
}
