use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use spree_sdk::{AdminStore, CampaignSettings, ClientMeta, Countdown, ExecutionLookup};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod accounts;
mod admin;
mod claims;
mod error;

use error::ApiResult;

const UNKNOWN: &str = "unknown";

pub fn router<S, L>(state: AppState<S, L>) -> Router
where
    S: AdminStore + 'static,
    L: ExecutionLookup + 'static,
{
    let admin = Router::new()
        .route("/settings", get(admin::get_settings::<S, L>).put(admin::put_settings::<S, L>))
        .route("/users", get(admin::list_users::<S, L>))
        .route("/users/:wallet/blacklist", post(admin::set_blacklist::<S, L>))
        .route("/stats", get(admin::stats::<S, L>))
        .route("/referrals/top", get(admin::top_referrers::<S, L>))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin::require_admin::<S, L>));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics::<S, L>))
        .route("/client-info", get(client_info))
        .route("/campaign", get(campaign::<S, L>))
        .route("/accounts", post(accounts::create_account::<S, L>))
        .route("/accounts/:wallet", get(accounts::get_account::<S, L>))
        .route("/accounts/:wallet/stats", get(accounts::get_stats::<S, L>))
        .route("/accounts/:wallet/tasks/:platform", post(accounts::report_task::<S, L>))
        .route("/accounts/:wallet/referrals", get(accounts::get_referrals::<S, L>))
        .route("/accounts/:wallet/claims", post(claims::finalize::<S, L>))
        .route("/referrals/:code", get(accounts::validate_code::<S, L>))
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

pub async fn render_metrics<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render())
}

/// Request metadata as seen through the proxy chain.
pub(crate) fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let ip = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"));

    ClientMeta {
        ip: ip.map(str::to_string),
        user_agent: header("user-agent").map(str::to_string),
    }
}

pub async fn client_info(headers: HeaderMap) -> Json<serde_json::Value> {
    let meta = client_meta(&headers);
    Json(json!({
        "ip": meta.ip.as_deref().unwrap_or(UNKNOWN),
        "user_agent": meta.user_agent.as_deref().unwrap_or(UNKNOWN),
    }))
}

#[derive(Debug, Serialize)]
pub struct CampaignView {
    pub settings: CampaignSettings,
    pub active: bool,
    pub countdown: Countdown,
}

pub async fn campaign<S: AdminStore + 'static, L: ExecutionLookup + 'static>(
    State(state): State<AppState<S, L>>,
) -> ApiResult<Json<CampaignView>> {
    let settings = state.settings.get().await?;
    let now = Utc::now();
    Ok(Json(CampaignView {
        active: settings.is_active(now),
        countdown: settings.time_remaining(now),
        settings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use spree_sdk::{
        ClaimExecution, ClaimKind, ClaimTransaction, DistributorConfig, ExecutionReceipt,
        MemoryStore, Result, WalletAddress,
    };
    use tower::ServiceExt;

    use crate::chain::ChainUnavailable;
    use crate::config::Config;

    const TOKEN: &str = "s3cret";

    /// Executed transactions keyed by digest, shared with the router under test.
    #[derive(Clone, Default)]
    struct FakeChain {
        executed: Arc<Mutex<HashMap<String, ClaimExecution>>>,
    }

    impl FakeChain {
        fn execute(&self, digest: &str, sender: &str, kind: ClaimKind, tokens: u64, ok: bool) {
            let sender = WalletAddress::parse(sender).unwrap();
            let transaction =
                ClaimTransaction::build(&DistributorConfig::default(), kind, tokens, &sender)
                    .unwrap();
            let receipt = if ok {
                ExecutionReceipt::success(digest)
            } else {
                ExecutionReceipt::failure(digest, "MoveAbort(2)")
            };
            self.executed
                .lock()
                .unwrap()
                .insert(digest.to_string(), ClaimExecution { transaction, receipt });
        }
    }

    impl ExecutionLookup for FakeChain {
        async fn claim_execution(&self, digest: &str) -> Result<Option<ClaimExecution>> {
            Ok(self.executed.lock().unwrap().get(digest).cloned())
        }
    }

    fn config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: None,
            admin_token: Some(TOKEN.into()),
            settings_ttl: std::time::Duration::from_secs(60),
        }
    }

    fn app_on<L: ExecutionLookup + 'static>(chain: L) -> Router {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        router(AppState::new(MemoryStore::new(), chain, &config(), handle))
    }

    fn app() -> Router {
        app_on(FakeChain::default())
    }

    fn app_with_chain() -> (Router, FakeChain) {
        let chain = FakeChain::default();
        (app_on(chain.clone()), chain)
    }

    /// Move the campaign window around today so claims pass the activity guard.
    async fn open_campaign(app: &Router) {
        let auth = [("authorization", "Bearer s3cret")];
        let (_, mut settings) = call_with(app, Method::GET, "/admin/settings", None, &auth).await;
        let today = Utc::now().date_naive();
        settings["start_date"] = json!(today - chrono::Days::new(1));
        settings["end_date"] = json!(today + chrono::Days::new(30));
        let (status, _) =
            call_with(app, Method::PUT, "/admin/settings", Some(settings), &auth).await;
        assert_eq!(status, StatusCode::OK);
    }

    /// Registered wallet with the required task done; returns its claimable tokens.
    async fn participant(app: &Router, wallet: &str) -> u64 {
        open_campaign(app).await;
        call(app, Method::POST, "/accounts", Some(json!({ "wallet": wallet }))).await;
        call(app, Method::POST, &format!("/accounts/{wallet}/tasks/twitter"), None).await;
        let (_, stats) = call(app, Method::GET, &format!("/accounts/{wallet}/stats"), None).await;
        stats["total_tokens"].as_u64().unwrap()
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        call_with(app, method, uri, body, &[]).await
    }

    async fn call_with(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    // =====================================================================
    // PUBLIC ROUTES
    // =====================================================================

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[test]
    fn test_client_meta_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        headers.insert("user-agent", "Mozilla/5.0".parse().unwrap());
        let meta = client_meta(&headers);
        assert_eq!(meta.ip.as_deref(), Some("198.51.100.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("Mozilla/5.0"));

        headers.remove("x-forwarded-for");
        assert_eq!(client_meta(&headers).ip.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_client_info_unknown_without_headers() {
        let (_, body) = call(&app(), Method::GET, "/client-info", None).await;
        assert_eq!(body["ip"], "unknown");
        assert_eq!(body["user_agent"], "unknown");
    }

    #[tokio::test]
    async fn test_create_account_is_idempotent() {
        let app = app();
        let create = json!({ "wallet": "0xABC123" });

        let (status, first) = call(&app, Method::POST, "/accounts", Some(create.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["wallet"], "0xabc123");

        let (status, second) = call(&app, Method::POST, "/accounts", Some(create)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_bad_wallet_is_rejected() {
        let (status, body) =
            call(&app(), Method::POST, "/accounts", Some(json!({ "wallet": "nothex" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_referral_and_task_flow() {
        let app = app();
        let (_, referrer) =
            call(&app, Method::POST, "/accounts", Some(json!({ "wallet": "0xaa" }))).await;
        let code = referrer["referral_code"].as_str().unwrap().to_string();

        let (_, valid) = call(&app, Method::GET, &format!("/referrals/{code}"), None).await;
        assert_eq!(valid["valid"], true);

        let (_, referee) = call(
            &app,
            Method::POST,
            "/accounts",
            Some(json!({ "wallet": "0xbb", "referral_code": code })),
        )
        .await;
        assert_eq!(referee["referred_by"], code.as_str());

        let (status, report) = call(&app, Method::POST, "/accounts/0xaa/tasks/x", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["credited"], true);
        assert_eq!(report["tasks_completed"], true);

        let (_, earnings) = call(&app, Method::GET, "/accounts/0xaa/referrals", None).await;
        assert_eq!(earnings["total_unclaimed"], 500);

        let (_, stats) = call(&app, Method::GET, "/accounts/0xaa/stats", None).await;
        assert_eq!(stats["referral_count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_platform_is_bad_request() {
        let app = app();
        call(&app, Method::POST, "/accounts", Some(json!({ "wallet": "0xcc" }))).await;
        let (status, _) = call(&app, Method::POST, "/accounts/0xcc/tasks/myspace", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // =====================================================================
    // CLAIMS
    // =====================================================================

    #[tokio::test]
    async fn test_claim_with_made_up_digest_is_refused() {
        let app = app();
        participant(&app, "0xd0").await;

        let forged = json!({ "kind": "tokens", "digest": "made-up", "status": "success" });
        let (status, body) = call(&app, Method::POST, "/accounts/0xd0/claims", Some(forged)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);

        let (_, account) = call(&app, Method::GET, "/accounts/0xd0", None).await;
        assert_eq!(account["claimed"], false);
    }

    #[tokio::test]
    async fn test_claim_of_another_wallet_is_refused() {
        let (app, chain) = app_with_chain();
        let tokens = participant(&app, "0xd1").await;
        participant(&app, "0xd2").await;
        chain.execute("THEIRS", "0xd2", ClaimKind::Tokens, tokens, true);

        let body = json!({ "kind": "tokens", "digest": "THEIRS" });
        let (status, _) = call(&app, Method::POST, "/accounts/0xd1/claims", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, account) = call(&app, Method::GET, "/accounts/0xd1", None).await;
        assert_eq!(account["claimed"], false);
    }

    #[tokio::test]
    async fn test_claim_finalize_reads_status_from_chain() {
        let (app, chain) = app_with_chain();
        let tokens = participant(&app, "0xdd").await;
        chain.execute("D1", "0xdd", ClaimKind::Tokens, tokens, false);
        chain.execute("D2", "0xdd", ClaimKind::Tokens, tokens, true);

        let failed = json!({ "kind": "tokens", "digest": "D1", "status": "success" });
        let (status, _) = call(&app, Method::POST, "/accounts/0xdd/claims", Some(failed)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (_, account) = call(&app, Method::GET, "/accounts/0xdd", None).await;
        assert_eq!(account["claimed"], false);

        let ok = json!({ "kind": "tokens", "digest": "D2" });
        let (status, receipt) =
            call(&app, Method::POST, "/accounts/0xdd/claims", Some(ok.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["digest"], "D2");
        assert_eq!(receipt["amount"], tokens);

        let (_, again) = call(&app, Method::POST, "/accounts/0xdd/claims", Some(ok)).await;
        assert_eq!(again["amount"], 0);
    }

    #[tokio::test]
    async fn test_claim_requires_tasks() {
        let (app, chain) = app_with_chain();
        open_campaign(&app).await;
        let (_, account) =
            call(&app, Method::POST, "/accounts", Some(json!({ "wallet": "0xd3" }))).await;
        let base = account["base_reward"].as_u64().unwrap();
        chain.execute("EARLY", "0xd3", ClaimKind::Tokens, base, true);

        let body = json!({ "kind": "tokens", "digest": "EARLY" });
        let (status, body) = call(&app, Method::POST, "/accounts/0xd3/claims", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("twitter"));
    }

    #[tokio::test]
    async fn test_claim_without_chain_reader_is_unavailable() {
        let app = app_on(ChainUnavailable);
        participant(&app, "0xd4").await;

        let body = json!({ "kind": "tokens", "digest": "ANY" });
        let (status, _) = call(&app, Method::POST, "/accounts/0xd4/claims", Some(body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (_, account) = call(&app, Method::GET, "/accounts/0xd4", None).await;
        assert_eq!(account["claimed"], false);
    }

    #[tokio::test]
    async fn test_missing_account_is_404() {
        let (status, _) = call(&app(), Method::GET, "/accounts/0x404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_campaign_view() {
        let (status, body) = call(&app(), Method::GET, "/campaign", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["referral_bonuses"]["referrer"], 500);
        assert!(body["countdown"].is_object());
    }

    // =====================================================================
    // ADMIN ROUTES
    // =====================================================================

    #[tokio::test]
    async fn test_admin_requires_token() {
        let app = app();
        let (status, _) = call(&app, Method::GET, "/admin/stats", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let wrong = [("authorization", "Bearer nope")];
        let (status, _) = call_with(&app, Method::GET, "/admin/stats", None, &wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_blacklist_and_stats() {
        let (app, chain) = app_with_chain();
        let auth = [("authorization", "Bearer s3cret")];
        let tokens = participant(&app, "0xee").await;
        chain.execute("D9", "0xee", ClaimKind::Tokens, tokens, true);

        let (status, account) = call_with(
            &app,
            Method::POST,
            "/admin/users/0xee/blacklist",
            Some(json!({ "blacklisted": true })),
            &auth,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(account["blacklisted"], true);

        let ok = json!({ "kind": "tokens", "digest": "D9" });
        let (status, _) = call(&app, Method::POST, "/accounts/0xee/claims", Some(ok)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, stats) = call_with(&app, Method::GET, "/admin/stats", None, &auth).await;
        assert_eq!(stats["total_users"], 1);
        assert_eq!(stats["claimed_users"], 0);

        let (_, users) =
            call_with(&app, Method::GET, "/admin/users?search=0xe", None, &auth).await;
        assert_eq!(users.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_settings_round_trip() {
        let app = app();
        let auth = [("authorization", "Bearer s3cret")];
        let (_, mut settings) = call_with(&app, Method::GET, "/admin/settings", None, &auth).await;

        settings["referral_bonuses"]["referrer"] = json!(750);
        let (status, updated) =
            call_with(&app, Method::PUT, "/admin/settings", Some(settings), &auth).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["referral_bonuses"]["referrer"], 750);

        let mut bad = updated.clone();
        bad["token_range"] = json!({ "min": 10, "max": 1 });
        let (status, _) = call_with(&app, Method::PUT, "/admin/settings", Some(bad), &auth).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, current) = call(&app, Method::GET, "/campaign", None).await;
        assert_eq!(current["settings"]["referral_bonuses"]["referrer"], 750);
    }
}
