use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use spree_sdk::SpreeError;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Spree(SpreeError),
    Unauthorized,
}

impl From<SpreeError> for ApiError {
    fn from(err: SpreeError) -> Self {
        ApiError::Spree(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let ApiError::Spree(err) = self else {
            return StatusCode::UNAUTHORIZED;
        };
        match err {
            SpreeError::Validation(_) | SpreeError::InsufficientBalance { .. } => {
                StatusCode::BAD_REQUEST
            }
            SpreeError::NotFound(_) => StatusCode::NOT_FOUND,
            SpreeError::Blacklisted(_) => StatusCode::FORBIDDEN,
            SpreeError::CampaignInactive
            | SpreeError::TasksIncomplete(_)
            | SpreeError::AlreadyClaimed
            | SpreeError::NothingToClaim
            | SpreeError::ClaimInProgress => StatusCode::CONFLICT,
            SpreeError::Execution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SpreeError::Network(_) => StatusCode::BAD_GATEWAY,
            SpreeError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SpreeError::Consistency { .. }
            | SpreeError::ReferralCredit { .. }
            | SpreeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Spree(err) => err.to_string(),
            ApiError::Unauthorized => "unauthorized".to_string(),
        };
        if status.is_server_error() {
            error!(%status, error = %message, "request failed");
        }
        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
