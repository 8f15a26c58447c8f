use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{
    AdminStore, ClaimMark, InsertOutcome, NewAccount, ReferralTerms, SettingsSource, Store,
    TaskOutcome,
};
use crate::address::WalletAddress;
use crate::error::{Result, SpreeError};
use crate::model::{
    Account, AccountQuery, ActivityEntry, ActivityKind, CampaignStats, Platform, ReferralRecord,
    ReferrerSummary, UserStats,
};
use crate::referral::random_code;
use crate::settings::CampaignSettings;

#[derive(Default)]
struct Inner {
    accounts: BTreeMap<WalletAddress, Account>,
    codes: HashMap<String, WalletAddress>,
    referrals: Vec<ReferralRecord>,
    activity: Vec<ActivityEntry>,
    settings: BTreeMap<String, Value>,
}

impl Inner {
    fn account_mut(&mut self, wallet: &WalletAddress) -> Result<&mut Account> {
        self.accounts
            .get_mut(wallet)
            .ok_or_else(|| SpreeError::NotFound(format!("account {wallet}")))
    }
}

/// In-process store. Each call holds one lock for its whole unit of work.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    rng: Mutex<StdRng>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic referral codes.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self { inner: Mutex::new(Inner::default()), rng: Mutex::new(rng) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }

    pub fn referral_records(&self) -> Vec<ReferralRecord> {
        self.lock().referrals.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsSource for MemoryStore {
    async fn load_settings(&self) -> Result<Option<CampaignSettings>> {
        let rows: Vec<(String, Value)> = {
            let inner = self.lock();
            if inner.settings.is_empty() {
                return Ok(None);
            }
            inner.settings.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        CampaignSettings::from_entries(rows).map(Some)
    }

    async fn upsert_campaign_setting(&self, key: &str, value: Value) -> Result<()> {
        self.lock().settings.insert(key.to_string(), value);
        Ok(())
    }
}

impl Store for MemoryStore {
    async fn find_account(&self, wallet: &WalletAddress) -> Result<Option<Account>> {
        Ok(self.lock().accounts.get(wallet).cloned())
    }

    async fn find_account_by_code(&self, code: &str) -> Result<Option<Account>> {
        let inner = self.lock();
        Ok(inner.codes.get(code).and_then(|w| inner.accounts.get(w)).cloned())
    }

    async fn generate_referral_code(&self) -> Result<String> {
        let inner = self.lock();
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let code = random_code(&mut *rng);
            if !inner.codes.contains_key(&code) {
                return Ok(code);
            }
        }
    }

    async fn insert_account(&self, new: NewAccount) -> Result<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(existing) = inner.accounts.get(&new.wallet) {
            return Ok(InsertOutcome::WalletTaken(existing.clone()));
        }
        if inner.codes.contains_key(&new.referral_code) {
            return Ok(InsertOutcome::CodeTaken);
        }

        let account = Account::new(
            new.wallet.clone(),
            new.referral_code.clone(),
            new.base_reward,
            new.client,
            new.created_at,
        );
        let entry =
            ActivityEntry::new(new.wallet.clone(), ActivityKind::UserCreated, new.created_at)
                .with_reward(new.base_reward)
                .with_metadata(json!({ "referral_code": new.presented_code }));

        inner.codes.insert(new.referral_code, new.wallet.clone());
        inner.accounts.insert(new.wallet, account.clone());
        inner.activity.push(entry);
        Ok(InsertOutcome::Created(account))
    }

    async fn process_referral(
        &self,
        code: &str,
        referee: &WalletAddress,
        terms: ReferralTerms,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralRecord>> {
        let mut inner = self.lock();
        let Some(referrer) = inner.codes.get(code).cloned() else {
            return Ok(None);
        };
        if &referrer == referee {
            return Ok(None);
        }
        if inner.account_mut(referee)?.referred_by.is_some() {
            return Ok(None);
        }
        if let Some(max) = terms.max_referrals {
            let count = inner.referrals.iter().filter(|r| r.referrer == referrer).count();
            if count >= max as usize {
                return Ok(None);
            }
        }

        let referrer_account = inner.account_mut(&referrer)?;
        referrer_account.referral_bonus += terms.bonuses.referrer;
        referrer_account.updated_at = now;

        let referee_account = inner.account_mut(referee)?;
        referee_account.base_reward += terms.bonuses.referee;
        referee_account.referred_by = Some(code.to_string());
        referee_account.updated_at = now;

        let record = ReferralRecord {
            id: Uuid::new_v4(),
            referrer: referrer.clone(),
            referee: referee.clone(),
            referral_code: code.to_string(),
            referrer_bonus: terms.bonuses.referrer,
            referee_bonus: terms.bonuses.referee,
            claimed: false,
            created_at: now,
            claimed_at: None,
        };
        inner.referrals.push(record.clone());
        let metadata = json!({ "referee": referee, "referee_bonus": terms.bonuses.referee });
        inner.activity.push(
            ActivityEntry::new(referrer, ActivityKind::ReferralCredited, now)
                .with_reward(terms.bonuses.referrer)
                .with_metadata(metadata),
        );
        Ok(Some(record))
    }

    async fn complete_platform_task(
        &self,
        wallet: &WalletAddress,
        platform: Platform,
        reward: u64,
        required: &[Platform],
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let mut inner = self.lock();
        let account = inner.account_mut(wallet)?;
        if account.task(platform).connected {
            return Ok(TaskOutcome::AlreadyConnected(account.clone()));
        }

        let task = account.tasks.entry(platform).or_default();
        task.connected = true;
        task.reward = reward;
        if !account.tasks_completed && account.has_connected_all(required) {
            account.tasks_completed = true;
        }
        account.updated_at = now;
        let updated = account.clone();

        inner.activity.push(
            ActivityEntry::new(wallet.clone(), ActivityKind::SocialTask, now)
                .with_platform(platform)
                .with_reward(reward),
        );
        Ok(TaskOutcome::Credited(updated))
    }

    async fn mark_tokens_claimed(
        &self,
        wallet: &WalletAddress,
        digest: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimMark> {
        let mut inner = self.lock();
        let account = inner.account_mut(wallet)?;
        if account.claimed {
            return Ok(ClaimMark::Already(account.clone()));
        }

        account.claimed = true;
        account.claimed_at = Some(now);
        account.updated_at = now;
        let updated = account.clone();

        let mut bonus = 0u64;
        for record in inner
            .referrals
            .iter_mut()
            .filter(|r| &r.referrer == wallet && !r.claimed)
        {
            record.claimed = true;
            record.claimed_at = Some(now);
            bonus += record.referrer_bonus;
        }
        let amount = updated.allocation().saturating_add(bonus);

        inner.activity.push(
            ActivityEntry::new(wallet.clone(), ActivityKind::TokensClaimed, now)
                .with_reward(amount)
                .with_metadata(json!({ "digest": digest, "referral_bonus": bonus })),
        );
        Ok(ClaimMark::Newly { account: updated, amount })
    }

    async fn mark_referral_bonuses_claimed(
        &self,
        wallet: &WalletAddress,
        digest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.lock();
        inner.account_mut(wallet)?;

        let mut flipped = 0u64;
        for record in inner
            .referrals
            .iter_mut()
            .filter(|r| &r.referrer == wallet && !r.claimed)
        {
            record.claimed = true;
            record.claimed_at = Some(now);
            flipped += record.referrer_bonus;
        }

        if flipped > 0 {
            inner.activity.push(
                ActivityEntry::new(wallet.clone(), ActivityKind::ReferralBonusesClaimed, now)
                    .with_reward(flipped)
                    .with_metadata(json!({ "digest": digest })),
            );
        }
        Ok(flipped)
    }

    async fn referrals_by_referrer(&self, wallet: &WalletAddress) -> Result<Vec<ReferralRecord>> {
        let inner = self.lock();
        let mut records: Vec<_> =
            inner.referrals.iter().filter(|r| &r.referrer == wallet).cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn user_stats(&self, wallet: &WalletAddress) -> Result<Option<UserStats>> {
        let inner = self.lock();
        Ok(inner.accounts.get(wallet).map(|account| {
            let count = inner.referrals.iter().filter(|r| &r.referrer == wallet).count();
            UserStats::new(account.clone(), count as u64)
        }))
    }

    async fn activity(&self, wallet: &WalletAddress) -> Result<Vec<ActivityEntry>> {
        Ok(self.lock().activity.iter().filter(|e| &e.wallet == wallet).cloned().collect())
    }
}

impl AdminStore for MemoryStore {
    async fn list_accounts(&self, query: &AccountQuery) -> Result<Vec<Account>> {
        let inner = self.lock();
        let needle = query.search.as_deref().map(|s| s.trim().to_ascii_lowercase());
        let mut accounts: Vec<_> = inner
            .accounts
            .values()
            .filter(|a| match &needle {
                Some(n) => {
                    a.wallet.as_str().contains(n.as_str())
                        || a.referral_code.to_ascii_lowercase().contains(n.as_str())
                }
                None => true,
            })
            .cloned()
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.wallet.cmp(&b.wallet)));
        Ok(accounts.into_iter().skip(query.offset).take(query.limit).collect())
    }

    async fn set_blacklisted(
        &self,
        wallet: &WalletAddress,
        blacklisted: bool,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut inner = self.lock();
        let account = inner.account_mut(wallet)?;
        account.blacklisted = blacklisted;
        account.updated_at = now;
        let updated = account.clone();
        inner.activity.push(
            ActivityEntry::new(wallet.clone(), ActivityKind::Blacklisted, now)
                .with_metadata(json!({ "blacklisted": blacklisted })),
        );
        Ok(updated)
    }

    async fn campaign_stats(&self) -> Result<CampaignStats> {
        let inner = self.lock();
        let mut stats = CampaignStats {
            total_users: inner.accounts.len() as u64,
            total_referrals: inner.referrals.len() as u64,
            ..Default::default()
        };
        for platform in Platform::ALL {
            let connected = inner.accounts.values().filter(|a| a.task(platform).connected).count();
            stats.platform_connected.insert(platform, connected as u64);
        }
        for account in inner.accounts.values().filter(|a| a.claimed) {
            stats.claimed_users += 1;
            stats.tokens_distributed += account.allocation();
        }
        stats.tokens_distributed += inner
            .referrals
            .iter()
            .filter(|r| r.claimed)
            .map(|r| r.referrer_bonus)
            .sum::<u64>();
        Ok(stats)
    }

    async fn top_referrers(&self, limit: usize) -> Result<Vec<ReferrerSummary>> {
        let inner = self.lock();
        let mut counts: HashMap<&WalletAddress, u64> = HashMap::new();
        for record in &inner.referrals {
            *counts.entry(&record.referrer).or_default() += 1;
        }
        let mut summaries: Vec<_> = counts
            .into_iter()
            .filter_map(|(wallet, count)| {
                inner.accounts.get(wallet).map(|a| ReferrerSummary {
                    wallet: a.wallet.clone(),
                    referral_code: a.referral_code.clone(),
                    referral_count: count,
                    referral_bonus: a.referral_bonus,
                })
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.referral_count
                .cmp(&a.referral_count)
                .then(b.referral_bonus.cmp(&a.referral_bonus))
                .then(a.wallet.cmp(&b.wallet))
        });
        summaries.truncate(limit);
        Ok(summaries)
    }
}
