//! Operator-adjustable campaign parameters and the time-boxed cache every
//! consumer reads them through.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SpreeError};
use crate::model::Platform;
use crate::store::SettingsSource;

pub const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_TOKEN_RANGE: RewardRange = RewardRange { min: 100, max: 10_000 };
pub const DEFAULT_PLATFORM_RANGE: RewardRange = RewardRange { min: 50, max: 499 };
pub const DEFAULT_REFERRER_BONUS: u64 = 500;
pub const DEFAULT_REFEREE_BONUS: u64 = 250;

const KEY_TOKEN_RANGE: &str = "token_range";
const KEY_PLATFORM_REWARDS: &str = "platform_rewards";
const KEY_REFERRAL_BONUSES: &str = "referral_bonuses";
const KEY_START_DATE: &str = "start_date";
const KEY_END_DATE: &str = "end_date";
const KEY_MAX_REFERRALS: &str = "max_referrals";
const KEY_REQUIRED_PLATFORMS: &str = "required_platforms";

/// Inclusive `[min, max]` token range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRange {
    pub min: u64,
    pub max: u64,
}

impl RewardRange {
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.min > self.max {
            return Err(SpreeError::Validation(format!(
                "{name}: min {} exceeds max {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    pub fn contains(&self, amount: u64) -> bool {
        (self.min..=self.max).contains(&amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralBonuses {
    pub referrer: u64,
    pub referee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSettings {
    pub token_range: RewardRange,
    pub platform_rewards: BTreeMap<Platform, RewardRange>,
    pub referral_bonuses: ReferralBonuses,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Cap on accounts a single referrer may bring in. `None` is unlimited.
    pub max_referrals: Option<u32>,
    /// Platforms that must be connected before `tasks_completed` flips.
    pub required_platforms: Vec<Platform>,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            token_range: DEFAULT_TOKEN_RANGE,
            platform_rewards: Platform::ALL
                .iter()
                .map(|p| (*p, DEFAULT_PLATFORM_RANGE))
                .collect(),
            referral_bonuses: ReferralBonuses {
                referrer: DEFAULT_REFERRER_BONUS,
                referee: DEFAULT_REFEREE_BONUS,
            },
            start_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 5, 31).unwrap_or_default(),
            max_referrals: None,
            required_platforms: vec![Platform::Twitter],
        }
    }
}

/// Time left until the campaign closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl CampaignSettings {
    pub fn platform_range(&self, platform: Platform) -> RewardRange {
        self.platform_rewards
            .get(&platform)
            .copied()
            .unwrap_or(DEFAULT_PLATFORM_RANGE)
    }

    pub fn validate(&self) -> Result<()> {
        self.token_range.validate(KEY_TOKEN_RANGE)?;
        for (platform, range) in &self.platform_rewards {
            range.validate(platform.as_str())?;
        }
        if self.start_date > self.end_date {
            return Err(SpreeError::Validation(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }
        Ok(())
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start_date.and_time(NaiveTime::MIN))
    }

    /// End date is inclusive through 23:59:59.
    pub fn ends_at(&self) -> DateTime<Utc> {
        let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&self.end_date.and_time(last_second))
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at() && now <= self.ends_at()
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Countdown {
        let left = (self.ends_at() - now).num_seconds();
        if left <= 0 {
            return Countdown::default();
        }
        let left = left as u64;
        Countdown {
            days: left / 86_400,
            hours: (left / 3_600) % 24,
            minutes: (left / 60) % 60,
            seconds: left % 60,
        }
    }

    /// Key/value rows as persisted by `upsert_campaign_setting`.
    pub fn to_entries(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            (KEY_TOKEN_RANGE, serde_json::to_value(self.token_range)?),
            (KEY_PLATFORM_REWARDS, serde_json::to_value(&self.platform_rewards)?),
            (KEY_REFERRAL_BONUSES, serde_json::to_value(self.referral_bonuses)?),
            (KEY_START_DATE, serde_json::to_value(self.start_date)?),
            (KEY_END_DATE, serde_json::to_value(self.end_date)?),
            (KEY_MAX_REFERRALS, serde_json::to_value(self.max_referrals)?),
            (KEY_REQUIRED_PLATFORMS, serde_json::to_value(&self.required_platforms)?),
        ])
    }

    /// Overlay stored rows on the defaults. Unknown keys are skipped.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut settings = Self::default();
        for (key, value) in entries {
            match key.as_str() {
                KEY_TOKEN_RANGE => settings.token_range = serde_json::from_value(value)?,
                KEY_PLATFORM_REWARDS => settings.platform_rewards = serde_json::from_value(value)?,
                KEY_REFERRAL_BONUSES => settings.referral_bonuses = serde_json::from_value(value)?,
                KEY_START_DATE => settings.start_date = serde_json::from_value(value)?,
                KEY_END_DATE => settings.end_date = serde_json::from_value(value)?,
                KEY_MAX_REFERRALS => settings.max_referrals = serde_json::from_value(value)?,
                KEY_REQUIRED_PLATFORMS => {
                    settings.required_platforms = serde_json::from_value(value)?
                }
                other => debug!(key = other, "ignoring unknown campaign setting"),
            }
        }
        Ok(settings)
    }
}

struct Cached {
    settings: CampaignSettings,
    fetched_at: DateTime<Utc>,
}

/// Read-through cache over the settings rows.
pub struct SettingsCache<S, C = SystemClock> {
    source: Arc<S>,
    clock: C,
    ttl: Duration,
    cached: RwLock<Option<Cached>>,
}

impl<S: SettingsSource, C: Clock> SettingsCache<S, C> {
    pub fn new(source: Arc<S>, clock: C, ttl: Duration) -> Self {
        Self { source, clock, ttl, cached: RwLock::new(None) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self) -> Result<CampaignSettings> {
        let now = self.clock.now();
        if let Some(cached) = self.cached.read().await.as_ref() {
            let fresh = (now - cached.fetched_at)
                .to_std()
                .map(|age| age < self.ttl)
                .unwrap_or(false);
            if fresh {
                return Ok(cached.settings.clone());
            }
        }

        let settings = self.source.load_settings().await?.unwrap_or_default();
        debug!(ttl_secs = self.ttl.as_secs(), "campaign settings refreshed");
        *self.cached.write().await = Some(Cached { settings: settings.clone(), fetched_at: now });
        Ok(settings)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// Persist every key. The cache is only dropped once all writes succeed.
    pub async fn update(&self, settings: &CampaignSettings) -> Result<()> {
        settings.validate()?;
        for (key, value) in settings.to_entries()? {
            if let Err(err) = self.source.upsert_campaign_setting(key, value).await {
                warn!(key, error = %err, "campaign setting write failed; cache left untouched");
                return Err(err);
            }
        }
        self.invalidate().await;
        Ok(())
    }
}
