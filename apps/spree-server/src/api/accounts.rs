use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use spree_sdk::{
    Account, AdminStore, ExecutionLookup, Platform, ReferralEarnings, Store, TaskReport,
    UserStats, WalletAddress,
};
use tracing::info;

use super::client_meta;
use super::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAccount {
    pub wallet: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Idempotent: an existing wallet gets its record back with 200.
pub async fn create_account<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    headers: HeaderMap,
    Json(body): Json<CreateAccount>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let wallet = WalletAddress::parse(&body.wallet)?;
    let existed = state.store.find_account(&wallet).await?.is_some();

    let account = state
        .registrar
        .ensure_account(&wallet, body.referral_code.as_deref(), Some(client_meta(&headers)))
        .await?;

    if existed {
        return Ok((StatusCode::OK, Json(account)));
    }
    counter!("accounts_created_total").increment(1);
    if account.referred_by.is_some() {
        counter!("referrals_credited_total").increment(1);
    }
    info!(wallet = %account.wallet.short(), "account registered");
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn get_account<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<Account>> {
    let wallet = WalletAddress::parse(&wallet)?;
    Ok(Json(state.registrar.account(&wallet).await?))
}

pub async fn get_stats<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<UserStats>> {
    let wallet = WalletAddress::parse(&wallet)?;
    Ok(Json(state.registrar.stats(&wallet).await?))
}

/// Unverified: the caller's word that the follow/join happened.
pub async fn report_task<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Path((wallet, platform)): Path<(String, String)>,
) -> ApiResult<Json<TaskReport>> {
    let wallet = WalletAddress::parse(&wallet)?;
    let platform: Platform = platform.parse()?;

    let report = state.registrar.self_report_task(&wallet, platform).await?;
    if report.credited {
        counter!("tasks_reported_total", "platform" => platform.as_str()).increment(1);
    }
    Ok(Json(report))
}

pub async fn get_referrals<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<ReferralEarnings>> {
    let wallet = WalletAddress::parse(&wallet)?;
    Ok(Json(state.registrar.ledger().earnings(&wallet).await?))
}

pub async fn validate_code<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Path(code): Path<String>,
) -> ApiResult<Json<Value>> {
    let valid = state.registrar.ledger().validate_code(&code).await?;
    Ok(Json(json!({ "valid": valid })))
}
