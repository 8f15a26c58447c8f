use thiserror::Error;

use crate::claim::ClaimKind;

#[derive(Error, Debug)]
pub enum SpreeError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction {digest} executed with failure status: {reason}")]
    Execution { digest: String, reason: String },

    /// The transaction succeeded on-chain but the store write that records it did not.
    #[error("{kind} confirmed on-chain in {digest} but records were not updated: {source}")]
    Consistency {
        kind: ClaimKind,
        digest: String,
        #[source]
        source: Box<SpreeError>,
    },

    #[error("Insufficient native balance: {balance} base units, {reserve} reserved for gas")]
    InsufficientBalance { balance: u64, reserve: u64 },

    #[error("Account {0} is blacklisted")]
    Blacklisted(String),

    #[error("Campaign is not active")]
    CampaignInactive,

    #[error("Tokens already claimed")]
    AlreadyClaimed,

    #[error("Required tasks not completed: {0}")]
    TasksIncomplete(String),

    #[error("Nothing to claim")]
    NothingToClaim,

    #[error("A claim is already in progress")]
    ClaimInProgress,

    /// The account was created but applying the inbound referral failed.
    #[error("Account {wallet} created but referral credit failed: {source}")]
    ReferralCredit {
        wallet: String,
        #[source]
        source: Box<SpreeError>,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = SpreeError> = std::result::Result<T, E>;

impl SpreeError {
    /// Errors the caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SpreeError::Network(_) | SpreeError::Consistency { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for SpreeError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => SpreeError::NotFound("row".into()),
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                SpreeError::Network(err.to_string())
            }
            other => SpreeError::Store(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SpreeError {
    fn from(err: serde_json::Error) -> Self {
        SpreeError::Validation(err.to_string())
    }
}
