use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AdminStore, ClaimMark, InsertOutcome, NewAccount, ReferralTerms, SettingsSource, Store,
    TaskOutcome,
};
use crate::address::WalletAddress;
use crate::error::{Result, SpreeError};
use crate::model::{
    Account, AccountQuery, ActivityEntry, ActivityKind, CampaignStats, Platform, PlatformTask,
    ReferralRecord, ReferrerSummary, UserStats,
};
use crate::referral::random_code;
use crate::settings::CampaignSettings;

const MAX_POOL_CONNECTIONS: u32 = 10;
const CODE_ATTEMPTS: usize = 16;

const REFERRAL_COLUMNS: &str = "r.id, ur.wallet_address AS referrer, ue.wallet_address AS referee, \
     r.referral_code, r.referrer_bonus, r.referee_bonus, r.claimed, r.created_at, r.claimed_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    wallet_address: String,
    referral_code: String,
    referred_by: Option<String>,
    base_token_amount: i64,
    twitter_connected: bool,
    twitter_reward: i64,
    telegram_connected: bool,
    telegram_reward: i64,
    discord_connected: bool,
    discord_reward: i64,
    referral_bonus: i64,
    tasks_completed: bool,
    claimed: bool,
    blacklisted: bool,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_account(self) -> Result<Account> {
        let tasks = [
            (Platform::Twitter, self.twitter_connected, self.twitter_reward),
            (Platform::Telegram, self.telegram_connected, self.telegram_reward),
            (Platform::Discord, self.discord_connected, self.discord_reward),
        ]
        .into_iter()
        .map(|(p, connected, reward)| (p, PlatformTask { connected, reward: amount(reward) }))
        .collect();

        Ok(Account {
            id: self.id,
            wallet: WalletAddress::parse(&self.wallet_address)?,
            referral_code: self.referral_code,
            referred_by: self.referred_by,
            base_reward: amount(self.base_token_amount),
            tasks,
            referral_bonus: amount(self.referral_bonus),
            tasks_completed: self.tasks_completed,
            claimed: self.claimed,
            blacklisted: self.blacklisted,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            created_at: self.created_at,
            updated_at: self.updated_at,
            claimed_at: self.claimed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReferralRow {
    id: Uuid,
    referrer: String,
    referee: String,
    referral_code: String,
    referrer_bonus: i64,
    referee_bonus: i64,
    claimed: bool,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
}

impl ReferralRow {
    fn into_record(self) -> Result<ReferralRecord> {
        Ok(ReferralRecord {
            id: self.id,
            referrer: WalletAddress::parse(&self.referrer)?,
            referee: WalletAddress::parse(&self.referee)?,
            referral_code: self.referral_code,
            referrer_bonus: amount(self.referrer_bonus),
            referee_bonus: amount(self.referee_bonus),
            claimed: self.claimed,
            created_at: self.created_at,
            claimed_at: self.claimed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ActivityRow {
    id: Uuid,
    wallet_address: String,
    activity_type: String,
    platform: Option<String>,
    reward_amount: Option<i64>,
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl ActivityRow {
    fn into_entry(self) -> Result<ActivityEntry> {
        Ok(ActivityEntry {
            id: self.id,
            wallet: WalletAddress::parse(&self.wallet_address)?,
            kind: self.activity_type.parse()?,
            platform: self.platform.as_deref().map(str::parse).transpose()?,
            reward_amount: self.reward_amount.map(amount),
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

fn amount(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn column(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| SpreeError::Validation(format!("amount {v} out of range")))
}

fn not_found(wallet: &WalletAddress) -> SpreeError {
    SpreeError::NotFound(format!("account {wallet}"))
}

async fn lock_user(conn: &mut PgConnection, wallet: &WalletAddress) -> Result<Option<UserRow>> {
    Ok(sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE wallet_address = $1 FOR UPDATE")
        .bind(wallet.as_str())
        .fetch_optional(conn)
        .await?)
}

/// Substring pattern for `ILIKE ... ESCAPE '\'` with the search text taken literally.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for ch in search.trim().chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

async fn log_activity(
    conn: &mut PgConnection,
    user_id: Uuid,
    entry: &ActivityEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO activity_log \
         (id, user_id, activity_type, platform, reward_amount, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id)
    .bind(user_id)
    .bind(entry.kind.as_str())
    .bind(entry.platform.map(|p| p.as_str()))
    .bind(entry.reward_amount.map(column).transpose()?)
    .bind(&entry.metadata)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Flips the referrer's unclaimed records; returns the bonus sum flipped.
async fn flip_referrals(
    conn: &mut PgConnection,
    referrer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64> {
    let flipped: Vec<(i64,)> = sqlx::query_as(
        "UPDATE referrals SET claimed = TRUE, claimed_at = $2 \
         WHERE referrer_id = $1 AND NOT claimed RETURNING referrer_bonus",
    )
    .bind(referrer_id)
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(flipped.into_iter().map(|(bonus,)| amount(bonus)).sum())
}

/// Postgres-backed store. Each mutating call runs in one transaction with
/// the affected user rows locked `FOR UPDATE`.
#[derive(Debug)]
pub struct PgStore {
    pool: PgPool,
    rng: Mutex<StdRng>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, rng: Mutex::new(StdRng::from_entropy()) }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect(database_url)
            .await?;
        info!(max_connections = MAX_POOL_CONNECTIONS, "postgres pool ready");
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SpreeError::Store(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn next_code(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        random_code(&mut *rng)
    }
}

impl SettingsSource for PgStore {
    async fn load_settings(&self) -> Result<Option<CampaignSettings>> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT key, value FROM campaign_settings")
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        CampaignSettings::from_entries(rows).map(Some)
    }

    async fn upsert_campaign_setting(&self, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO campaign_settings (key, value, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        debug!(key, "campaign setting upserted");
        Ok(())
    }
}

impl Store for PgStore {
    async fn find_account(&self, wallet: &WalletAddress) -> Result<Option<Account>> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE wallet_address = $1")
            .bind(wallet.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(UserRow::into_account)
            .transpose()
    }

    async fn find_account_by_code(&self, code: &str) -> Result<Option<Account>> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(UserRow::into_account)
            .transpose()
    }

    async fn generate_referral_code(&self) -> Result<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = self.next_code();
            let (taken,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE referral_code = $1)")
                    .bind(&code)
                    .fetch_one(&self.pool)
                    .await?;
            if !taken {
                return Ok(code);
            }
        }
        Err(SpreeError::Store(format!("no free referral code after {CODE_ATTEMPTS} attempts")))
    }

    async fn insert_account(&self, new: NewAccount) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let account = Account::new(
            new.wallet.clone(),
            new.referral_code.clone(),
            new.base_reward,
            new.client,
            new.created_at,
        );

        let inserted = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, wallet_address, referral_code, base_token_amount, ip_address, \
             user_agent, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
             ON CONFLICT DO NOTHING RETURNING *",
        )
        .bind(account.id)
        .bind(account.wallet.as_str())
        .bind(&account.referral_code)
        .bind(column(account.base_reward)?)
        .bind(&account.ip_address)
        .bind(&account.user_agent)
        .bind(account.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            tx.rollback().await?;
            return Ok(match self.find_account(&new.wallet).await? {
                Some(existing) => InsertOutcome::WalletTaken(existing),
                None => InsertOutcome::CodeTaken,
            });
        };

        let entry = ActivityEntry::new(new.wallet, ActivityKind::UserCreated, new.created_at)
            .with_reward(new.base_reward)
            .with_metadata(json!({ "referral_code": new.presented_code }));
        log_activity(&mut tx, row.id, &entry).await?;
        tx.commit().await?;
        Ok(InsertOutcome::Created(row.into_account()?))
    }

    async fn process_referral(
        &self,
        code: &str,
        referee: &WalletAddress,
        terms: ReferralTerms,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralRecord>> {
        let mut tx = self.pool.begin().await?;

        let Some(referrer) =
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE referral_code = $1 FOR UPDATE")
                .bind(code)
                .fetch_optional(&mut *tx)
                .await?
        else {
            return Ok(None);
        };
        let referee_row = lock_user(&mut tx, referee).await?.ok_or_else(|| not_found(referee))?;
        if referrer.id == referee_row.id || referee_row.referred_by.is_some() {
            return Ok(None);
        }
        if let Some(max) = terms.max_referrals {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM referrals WHERE referrer_id = $1")
                    .bind(referrer.id)
                    .fetch_one(&mut *tx)
                    .await?;
            if count >= i64::from(max) {
                debug!(%code, count, max, "referral cap reached");
                return Ok(None);
            }
        }

        let referrer_bonus = column(terms.bonuses.referrer)?;
        let referee_bonus = column(terms.bonuses.referee)?;
        sqlx::query(
            "UPDATE users SET referral_bonus = referral_bonus + $2, updated_at = $3 WHERE id = $1",
        )
        .bind(referrer.id)
        .bind(referrer_bonus)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE users SET base_token_amount = base_token_amount + $2, referred_by = $3, \
             updated_at = $4 WHERE id = $1",
        )
        .bind(referee_row.id)
        .bind(referee_bonus)
        .bind(code)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let record = ReferralRecord {
            id: Uuid::new_v4(),
            referrer: WalletAddress::parse(&referrer.wallet_address)?,
            referee: referee.clone(),
            referral_code: code.to_string(),
            referrer_bonus: terms.bonuses.referrer,
            referee_bonus: terms.bonuses.referee,
            claimed: false,
            created_at: now,
            claimed_at: None,
        };
        sqlx::query(
            "INSERT INTO referrals (id, referrer_id, referee_id, referral_code, referrer_bonus, \
             referee_bonus, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(referrer.id)
        .bind(referee_row.id)
        .bind(code)
        .bind(referrer_bonus)
        .bind(referee_bonus)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let metadata = json!({ "referee": referee, "referee_bonus": terms.bonuses.referee });
        let entry =
            ActivityEntry::new(record.referrer.clone(), ActivityKind::ReferralCredited, now)
                .with_reward(terms.bonuses.referrer)
                .with_metadata(metadata);
        log_activity(&mut tx, referrer.id, &entry).await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let row = lock_user(&mut tx, wallet).await?.ok_or_else(|| not_found(wallet))?;
        let user_id = row.id;
        let mut account = row.into_account()?;
        if account.task(platform).connected {
            return Ok(TaskOutcome::AlreadyConnected(account));
        }

        account.tasks.insert(platform, PlatformTask { connected: true, reward });
        account.tasks_completed = account.tasks_completed || account.has_connected_all(required);
        account.updated_at = now;

        // Column names come from a closed enum, never from input.
        let p = platform.as_str();
        sqlx::query(&format!(
            "UPDATE users SET {p}_connected = TRUE, {p}_reward = $2, tasks_completed = $3, \
             updated_at = $4 WHERE id = $1"
        ))
        .bind(user_id)
        .bind(column(reward)?)
        .bind(account.tasks_completed)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let entry = ActivityEntry::new(wallet.clone(), ActivityKind::SocialTask, now)
            .with_platform(platform)
            .with_reward(reward);
        log_activity(&mut tx, user_id, &entry).await?;
        tx.commit().await?;
        Ok(TaskOutcome::Credited(account))
    }

    async fn mark_tokens_claimed(
        &self,
        wallet: &WalletAddress,
        digest: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimMark> {
        let mut tx = self.pool.begin().await?;
        let row = lock_user(&mut tx, wallet).await?.ok_or_else(|| not_found(wallet))?;
        let user_id = row.id;
        let mut account = row.into_account()?;
        if account.claimed {
            return Ok(ClaimMark::Already(account));
        }

        sqlx::query(
            "UPDATE users SET claimed = TRUE, claimed_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        account.claimed = true;
        account.claimed_at = Some(now);
        account.updated_at = now;

        let bonus = flip_referrals(&mut tx, user_id, now).await?;
        let amount = account.allocation().saturating_add(bonus);

        let entry = ActivityEntry::new(wallet.clone(), ActivityKind::TokensClaimed, now)
            .with_reward(amount)
            .with_metadata(json!({ "digest": digest, "referral_bonus": bonus }));
        log_activity(&mut tx, user_id, &entry).await?;
        tx.commit().await?;
        Ok(ClaimMark::Newly { account, amount })
    }

    async fn mark_referral_bonuses_claimed(
        &self,
        wallet: &WalletAddress,
        digest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let row = lock_user(&mut tx, wallet).await?.ok_or_else(|| not_found(wallet))?;

        let total = flip_referrals(&mut tx, row.id, now).await?;

        if total > 0 {
            let entry =
                ActivityEntry::new(wallet.clone(), ActivityKind::ReferralBonusesClaimed, now)
                    .with_reward(total)
                    .with_metadata(json!({ "digest": digest }));
            log_activity(&mut tx, row.id, &entry).await?;
        }
        tx.commit().await?;
        Ok(total)
    }

    async fn referrals_by_referrer(&self, wallet: &WalletAddress) -> Result<Vec<ReferralRecord>> {
        sqlx::query_as::<_, ReferralRow>(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM referrals r \
             JOIN users ur ON ur.id = r.referrer_id \
             JOIN users ue ON ue.id = r.referee_id \
             WHERE ur.wallet_address = $1 ORDER BY r.created_at DESC"
        ))
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ReferralRow::into_record)
        .collect()
    }

    async fn user_stats(&self, wallet: &WalletAddress) -> Result<Option<UserStats>> {
        let Some(account) = self.find_account(wallet).await? else {
            return Ok(None);
        };
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM referrals WHERE referrer_id = $1")
                .bind(account.id)
                .fetch_one(&self.pool)
                .await?;
        Ok(Some(UserStats::new(account, amount(count))))
    }

    async fn activity(&self, wallet: &WalletAddress) -> Result<Vec<ActivityEntry>> {
        sqlx::query_as::<_, ActivityRow>(
            "SELECT a.id, u.wallet_address, a.activity_type, a.platform, a.reward_amount, \
             a.metadata, a.created_at FROM activity_log a JOIN users u ON u.id = a.user_id \
             WHERE u.wallet_address = $1 ORDER BY a.created_at, a.id",
        )
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ActivityRow::into_entry)
        .collect()
    }
}

impl AdminStore for PgStore {
    async fn list_accounts(&self, query: &AccountQuery) -> Result<Vec<Account>> {
        let pattern = query.search.as_deref().map(like_pattern);
        sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users \
             WHERE $1::TEXT IS NULL \
             OR wallet_address ILIKE $1 ESCAPE '\\' OR referral_code ILIKE $1 ESCAPE '\\' \
             ORDER BY created_at DESC, wallet_address OFFSET $2 LIMIT $3",
        )
        .bind(pattern)
        .bind(i64::try_from(query.offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(UserRow::into_account)
        .collect()
    }

    async fn set_blacklisted(
        &self,
        wallet: &WalletAddress,
        blacklisted: bool,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET blacklisted = $2, updated_at = $3 \
             WHERE wallet_address = $1 RETURNING *",
        )
        .bind(wallet.as_str())
        .bind(blacklisted)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(wallet))?;

        let entry = ActivityEntry::new(wallet.clone(), ActivityKind::Blacklisted, now)
            .with_metadata(json!({ "blacklisted": blacklisted }));
        log_activity(&mut tx, row.id, &entry).await?;
        tx.commit().await?;
        row.into_account()
    }

    async fn campaign_stats(&self) -> Result<CampaignStats> {
        type UserTotals = (i64, i64, i64, i64, i64, i64);
        let (total, twitter, telegram, discord, claimed, allocated): UserTotals = sqlx::query_as(
            "SELECT COUNT(*), \
             COUNT(*) FILTER (WHERE twitter_connected), \
             COUNT(*) FILTER (WHERE telegram_connected), \
             COUNT(*) FILTER (WHERE discord_connected), \
             COUNT(*) FILTER (WHERE claimed), \
             COALESCE(SUM(base_token_amount + twitter_reward + telegram_reward \
                 + discord_reward) FILTER (WHERE claimed), 0)::BIGINT \
             FROM users",
        )
        .fetch_one(&self.pool)
        .await?;
        let (referrals, bonuses_paid): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
             COALESCE(SUM(referrer_bonus) FILTER (WHERE claimed), 0)::BIGINT FROM referrals",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CampaignStats {
            total_users: amount(total),
            platform_connected: [
                (Platform::Twitter, amount(twitter)),
                (Platform::Telegram, amount(telegram)),
                (Platform::Discord, amount(discord)),
            ]
            .into_iter()
            .collect(),
            claimed_users: amount(claimed),
            total_referrals: amount(referrals),
            tokens_distributed: amount(allocated).saturating_add(amount(bonuses_paid)),
        })
    }

    async fn top_referrers(&self, limit: usize) -> Result<Vec<ReferrerSummary>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT u.wallet_address, u.referral_code, COUNT(r.id), u.referral_bonus \
             FROM users u JOIN referrals r ON r.referrer_id = u.id \
             GROUP BY u.id ORDER BY COUNT(r.id) DESC, u.referral_bonus DESC, u.wallet_address \
             LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(wallet, referral_code, count, bonus)| {
                Ok(ReferrerSummary {
                    wallet: WalletAddress::parse(&wallet)?,
                    referral_code,
                    referral_count: amount(count),
                    referral_bonus: amount(bonus),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern(" 0xab "), "%0xab%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
