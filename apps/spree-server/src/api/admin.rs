use axum::extract::{Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use spree_sdk::{
    Account, AccountQuery, AdminStore, CampaignSettings, CampaignStats, ExecutionLookup,
    ReferrerSummary, WalletAddress,
};
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_PAGE: usize = 100;

/// Bearer-token gate in front of every `/admin` route.
pub async fn require_admin<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    req: Request,
    next: Next,
) -> ApiResult<Response> {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!("admin request rejected: ADMIN_TOKEN not configured");
        return Err(ApiError::Unauthorized);
    };
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

pub async fn get_settings<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
) -> ApiResult<Json<CampaignSettings>> {
    Ok(Json(state.settings.get().await?))
}

pub async fn put_settings<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Json(settings): Json<CampaignSettings>,
) -> ApiResult<Json<CampaignSettings>> {
    state.settings.update(&settings).await?;
    info!(start = %settings.start_date, end = %settings.end_date, "campaign settings updated");
    Ok(Json(state.settings.get().await?))
}

#[derive(Debug, Deserialize)]
pub struct UsersParams {
    pub search: Option<String>,
    #[serde(default)]
    pub page: usize,
    pub per_page: Option<usize>,
}

pub async fn list_users<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Query(params): Query<UsersParams>,
) -> ApiResult<Json<Vec<Account>>> {
    let limit = params.per_page.unwrap_or(AccountQuery::default().limit).clamp(1, MAX_PAGE);
    let query = AccountQuery {
        search: params.search.filter(|s| !s.trim().is_empty()),
        offset: params.page.saturating_mul(limit),
        limit,
    };
    Ok(Json(state.store.list_accounts(&query).await?))
}

#[derive(Debug, Deserialize)]
pub struct BlacklistBody {
    pub blacklisted: bool,
}

pub async fn set_blacklist<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Path(wallet): Path<String>,
    Json(body): Json<BlacklistBody>,
) -> ApiResult<Json<Account>> {
    let wallet = WalletAddress::parse(&wallet)?;
    let account = state.store.set_blacklisted(&wallet, body.blacklisted, Utc::now()).await?;
    info!(wallet = %wallet.short(), blacklisted = body.blacklisted, "blacklist updated");
    Ok(Json(account))
}

pub async fn stats<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
) -> ApiResult<Json<CampaignStats>> {
    Ok(Json(state.store.campaign_stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct TopParams {
    pub limit: Option<usize>,
}

pub async fn top_referrers<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
    Query(params): Query<TopParams>,
) -> ApiResult<Json<Vec<ReferrerSummary>>> {
    let limit = params.limit.unwrap_or(10).clamp(1, MAX_PAGE);
    Ok(Json(state.store.top_referrers(limit).await?))
}
