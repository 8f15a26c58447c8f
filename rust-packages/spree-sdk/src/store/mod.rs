//! Persistence seam.
//!
//! Every mutating call is one unit of work: the record change and its audit
//! entry land together or not at all. The in-memory store serializes calls
//! under a single lock; the Postgres store wraps each call in a transaction
//! and takes row locks on the accounts it touches.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::address::WalletAddress;
use crate::error::Result;
use crate::model::{
    Account, AccountQuery, ActivityEntry, CampaignStats, ClientMeta, Platform, ReferralRecord,
    ReferrerSummary, UserStats,
};
use crate::settings::{CampaignSettings, ReferralBonuses};

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Fields fixed when an account is first created.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub wallet: WalletAddress,
    pub referral_code: String,
    pub base_reward: u64,
    pub client: ClientMeta,
    /// Inbound referral code presented at creation, kept in the audit metadata.
    pub presented_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(Account),
    /// Another caller created this wallet first.
    WalletTaken(Account),
    /// The referral code is already in use; pick another and retry.
    CodeTaken,
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Credited(Account),
    AlreadyConnected(Account),
}

#[derive(Debug, Clone)]
pub enum ClaimMark {
    /// `amount` is the allocation plus the referral bonuses flipped with it.
    Newly { account: Account, amount: u64 },
    Already(Account),
}

impl ClaimMark {
    pub fn account(&self) -> &Account {
        match self {
            ClaimMark::Newly { account, .. } | ClaimMark::Already(account) => account,
        }
    }

    /// Tokens newly recorded as claimed by this mark.
    pub fn amount(&self) -> u64 {
        match self {
            ClaimMark::Newly { amount, .. } => *amount,
            ClaimMark::Already(_) => 0,
        }
    }
}

/// Terms a referral is credited under, captured from settings at credit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralTerms {
    pub bonuses: ReferralBonuses,
    pub max_referrals: Option<u32>,
}

impl From<&CampaignSettings> for ReferralTerms {
    fn from(settings: &CampaignSettings) -> Self {
        Self { bonuses: settings.referral_bonuses, max_referrals: settings.max_referrals }
    }
}

pub trait SettingsSource: Send + Sync {
    /// `None` when no setting row has ever been written.
    fn load_settings(&self) -> impl Future<Output = Result<Option<CampaignSettings>>> + Send;

    fn upsert_campaign_setting(
        &self,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait Store: SettingsSource {
    fn find_account(
        &self,
        wallet: &WalletAddress,
    ) -> impl Future<Output = Result<Option<Account>>> + Send;

    fn find_account_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<Account>>> + Send;

    /// A code not held by any account at the time of the call.
    fn generate_referral_code(&self) -> impl Future<Output = Result<String>> + Send;

    /// Insert-if-absent on wallet; appends the `user_created` audit entry.
    fn insert_account(
        &self,
        account: NewAccount,
    ) -> impl Future<Output = Result<InsertOutcome>> + Send;

    /// Credit referrer and referee once. `None` when the code is unknown, the
    /// referee already has a referrer, refers itself, or the cap is reached.
    fn process_referral(
        &self,
        code: &str,
        referee: &WalletAddress,
        terms: ReferralTerms,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<ReferralRecord>>> + Send;

    /// Field-level update of one platform. Sets `tasks_completed` once every
    /// platform in `required` is connected.
    fn complete_platform_task(
        &self,
        wallet: &WalletAddress,
        platform: Platform,
        reward: u64,
        required: &[Platform],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send;

    /// Sets `claimed`/`claimed_at` and appends the audit entry, once. Flips the
    /// unclaimed referral records where `wallet` is the referrer in the same
    /// unit of work, since the token claim pays their bonus.
    fn mark_tokens_claimed(
        &self,
        wallet: &WalletAddress,
        digest: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<ClaimMark>> + Send;

    /// Flips every unclaimed record referred by `wallet`; returns the bonus sum flipped.
    fn mark_referral_bonuses_claimed(
        &self,
        wallet: &WalletAddress,
        digest: Option<&str>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn referrals_by_referrer(
        &self,
        wallet: &WalletAddress,
    ) -> impl Future<Output = Result<Vec<ReferralRecord>>> + Send;

    fn user_stats(
        &self,
        wallet: &WalletAddress,
    ) -> impl Future<Output = Result<Option<UserStats>>> + Send;

    fn activity(
        &self,
        wallet: &WalletAddress,
    ) -> impl Future<Output = Result<Vec<ActivityEntry>>> + Send;
}

/// Operator queries.
pub trait AdminStore: Store {
    fn list_accounts(
        &self,
        query: &AccountQuery,
    ) -> impl Future<Output = Result<Vec<Account>>> + Send;

    fn set_blacklisted(
        &self,
        wallet: &WalletAddress,
        blacklisted: bool,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Account>> + Send;

    fn campaign_stats(&self) -> impl Future<Output = Result<CampaignStats>> + Send;

    fn top_referrers(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ReferrerSummary>>> + Send;
}
