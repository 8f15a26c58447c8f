//! Campaign records: accounts, referrals, audit entries and the read models
//! built from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::WalletAddress;
use crate::error::SpreeError;

/// Social platforms with a follow/join task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Telegram,
    Discord,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Twitter, Platform::Telegram, Platform::Discord];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Telegram => "telegram",
            Platform::Discord => "discord",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = SpreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "telegram" => Ok(Platform::Telegram),
            "discord" => Ok(Platform::Discord),
            other => Err(SpreeError::Validation(format!("unknown platform: {other}"))),
        }
    }
}

/// Task state for one platform. Moves from `(false, 0)` to `(true, reward)` once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformTask {
    pub connected: bool,
    pub reward: u64,
}

/// Request metadata captured for the audit trail when an account is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Per-wallet campaign participation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub wallet: WalletAddress,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub base_reward: u64,
    pub tasks: BTreeMap<Platform, PlatformTask>,
    pub referral_bonus: u64,
    pub tasks_completed: bool,
    pub claimed: bool,
    pub blacklisted: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(
        wallet: WalletAddress,
        referral_code: String,
        base_reward: u64,
        client: ClientMeta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet,
            referral_code,
            referred_by: None,
            base_reward,
            tasks: Platform::ALL
                .iter()
                .map(|p| (*p, PlatformTask::default()))
                .collect(),
            referral_bonus: 0,
            tasks_completed: false,
            claimed: false,
            blacklisted: false,
            ip_address: client.ip,
            user_agent: client.user_agent,
            created_at: now,
            updated_at: now,
            claimed_at: None,
        }
    }

    pub fn task(&self, platform: Platform) -> PlatformTask {
        self.tasks.get(&platform).copied().unwrap_or_default()
    }

    pub fn platform_rewards(&self) -> u64 {
        self.tasks.values().map(|t| t.reward).sum()
    }

    /// base + platform rewards, the part paid only by the token claim.
    pub fn allocation(&self) -> u64 {
        self.base_reward.saturating_add(self.platform_rewards())
    }

    /// base + platform rewards + referral bonus, recomputed on every call.
    pub fn total_claimable(&self) -> u64 {
        self.allocation().saturating_add(self.referral_bonus)
    }

    pub fn has_connected_all(&self, required: &[Platform]) -> bool {
        required.iter().all(|p| self.task(*p).connected)
    }
}

/// One successful referral event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub id: Uuid,
    pub referrer: WalletAddress,
    pub referee: WalletAddress,
    pub referral_code: String,
    pub referrer_bonus: u64,
    pub referee_bonus: u64,
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    UserCreated,
    SocialTask,
    ReferralCredited,
    TokensClaimed,
    ReferralBonusesClaimed,
    Blacklisted,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::UserCreated => "user_created",
            ActivityKind::SocialTask => "social_task",
            ActivityKind::ReferralCredited => "referral_credited",
            ActivityKind::TokensClaimed => "tokens_claimed",
            ActivityKind::ReferralBonusesClaimed => "referral_bonuses_claimed",
            ActivityKind::Blacklisted => "blacklisted",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = SpreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_created" => Ok(ActivityKind::UserCreated),
            "social_task" => Ok(ActivityKind::SocialTask),
            "referral_credited" => Ok(ActivityKind::ReferralCredited),
            "tokens_claimed" => Ok(ActivityKind::TokensClaimed),
            "referral_bonuses_claimed" => Ok(ActivityKind::ReferralBonusesClaimed),
            "blacklisted" => Ok(ActivityKind::Blacklisted),
            other => Err(SpreeError::Validation(format!("unknown activity kind: {other}"))),
        }
    }
}

/// Audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub wallet: WalletAddress,
    pub kind: ActivityKind,
    pub platform: Option<Platform>,
    pub reward_amount: Option<u64>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(wallet: WalletAddress, kind: ActivityKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet,
            kind,
            platform: None,
            reward_amount: None,
            metadata: serde_json::Value::Null,
            created_at: now,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_reward(mut self, amount: u64) -> Self {
        self.reward_amount = Some(amount);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub account: Account,
    pub referral_count: u64,
    pub total_tokens: u64,
}

impl UserStats {
    pub fn new(account: Account, referral_count: u64) -> Self {
        let total_tokens = account.total_claimable();
        Self { account, referral_count, total_tokens }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEarnings {
    pub records: Vec<ReferralRecord>,
    pub total_claimed: u64,
    pub total_unclaimed: u64,
}

impl ReferralEarnings {
    pub fn from_records(records: Vec<ReferralRecord>) -> Self {
        let (total_claimed, total_unclaimed) =
            records.iter().fold((0u64, 0u64), |(claimed, unclaimed), r| {
                if r.claimed {
                    (claimed.saturating_add(r.referrer_bonus), unclaimed)
                } else {
                    (claimed, unclaimed.saturating_add(r.referrer_bonus))
                }
            });
        Self { records, total_claimed, total_unclaimed }
    }
}

/// Campaign-wide numbers for the operator dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_users: u64,
    pub platform_connected: BTreeMap<Platform, u64>,
    pub claimed_users: u64,
    pub total_referrals: u64,
    /// Allocations of claimed accounts plus the bonuses of claimed referral records.
    pub tokens_distributed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerSummary {
    pub wallet: WalletAddress,
    pub referral_code: String,
    pub referral_count: u64,
    pub referral_bonus: u64,
}

/// Paged, optionally filtered account listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountQuery {
    pub search: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for AccountQuery {
    fn default() -> Self {
        Self { search: None, offset: 0, limit: 10 }
    }
}
