use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::WalletAddress;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SpreeError};
use crate::model::{Account, ClientMeta, Platform, UserStats};
use crate::referral::{normalize_code, ReferralLedger};
use crate::rewards::{generate_base_reward, generate_platform_reward};
use crate::settings::SettingsCache;
use crate::store::{InsertOutcome, NewAccount, Store, TaskOutcome};

/// Attempts at finding an unused referral code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 5;

/// Outcome of a self-reported social task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub platform: Platform,
    pub reward: u64,
    /// False when the platform was already connected and nothing changed.
    pub credited: bool,
    pub tasks_completed: bool,
}

/// Creates accounts exactly once per wallet and applies per-account rewards.
pub struct Registrar<S, C = SystemClock> {
    store: Arc<S>,
    settings: Arc<SettingsCache<S, C>>,
    ledger: ReferralLedger<S, C>,
    clock: C,
    rng: Mutex<StdRng>,
}

impl<S: Store, C: Clock + Clone> Registrar<S, C> {
    pub fn new(store: Arc<S>, settings: Arc<SettingsCache<S, C>>, clock: C) -> Self {
        let ledger = ReferralLedger::new(store.clone(), settings.clone(), clock.clone());
        Self { store, settings, ledger, clock, rng: Mutex::new(StdRng::from_entropy()) }
    }

    /// Fixed randomness source for reward draws.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn ledger(&self) -> &ReferralLedger<S, C> {
        &self.ledger
    }

    pub fn settings(&self) -> &Arc<SettingsCache<S, C>> {
        &self.settings
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the wallet's account, creating it on first sight.
    ///
    /// `referral_code` only applies when the account is created here; it is
    /// ignored for existing accounts.
    pub async fn ensure_account(
        &self,
        wallet: &WalletAddress,
        referral_code: Option<&str>,
        client: Option<ClientMeta>,
    ) -> Result<Account> {
        if let Some(existing) = self.store.find_account(wallet).await? {
            debug!(%wallet, "account exists");
            return Ok(existing);
        }

        let settings = self.settings.get().await?;
        let base_reward = generate_base_reward(&settings, wallet, &mut *self.rng());
        let presented = referral_code.and_then(normalize_code);
        let client = client.unwrap_or_default();

        let mut created = None;
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = self.store.generate_referral_code().await?;
            let new = NewAccount {
                wallet: wallet.clone(),
                referral_code: code,
                base_reward,
                client: client.clone(),
                presented_code: presented.clone(),
                created_at: self.clock.now(),
            };
            match self.store.insert_account(new).await? {
                InsertOutcome::Created(account) => {
                    created = Some(account);
                    break;
                }
                InsertOutcome::WalletTaken(existing) => {
                    debug!(%wallet, "account created concurrently");
                    return Ok(existing);
                }
                InsertOutcome::CodeTaken => {
                    warn!(%wallet, attempt, "referral code collision, retrying");
                }
            }
        }
        let account = created.ok_or_else(|| {
            SpreeError::Store(format!(
                "no unique referral code after {MAX_CODE_ATTEMPTS} attempts"
            ))
        })?;
        info!(
            %wallet,
            referral_code = %account.referral_code,
            base_reward = account.base_reward,
            "account created"
        );

        let Some(code) = presented.filter(|c| *c != account.referral_code) else {
            return Ok(account);
        };
        match self.ledger.credit_referral(&code, wallet).await {
            Ok(Some(_)) => self
                .store
                .find_account(wallet)
                .await
                .and_then(|a| a.ok_or_else(|| SpreeError::NotFound(format!("account {wallet}"))))
                .map_err(|e| SpreeError::ReferralCredit {
                    wallet: wallet.to_string(),
                    source: Box::new(e),
                }),
            Ok(None) => Ok(account),
            Err(err) => {
                warn!(%wallet, %code, error = %err, "account created but referral credit failed");
                Err(SpreeError::ReferralCredit {
                    wallet: wallet.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    /// Unverified self-report that the user followed/joined `platform`.
    ///
    /// Nothing checks the social network; the report is taken at face value.
    /// Reporting the same platform twice leaves the first reward in place.
    pub async fn self_report_task(
        &self,
        wallet: &WalletAddress,
        platform: Platform,
    ) -> Result<TaskReport> {
        let settings = self.settings.get().await?;
        let reward = generate_platform_reward(platform, &settings, &mut *self.rng());

        let outcome = self
            .store
            .complete_platform_task(
                wallet,
                platform,
                reward,
                &settings.required_platforms,
                self.clock.now(),
            )
            .await?;

        Ok(match outcome {
            TaskOutcome::Credited(account) => {
                info!(%wallet, %platform, reward, "social task credited");
                TaskReport {
                    platform,
                    reward,
                    credited: true,
                    tasks_completed: account.tasks_completed,
                }
            }
            TaskOutcome::AlreadyConnected(account) => TaskReport {
                platform,
                reward: account.task(platform).reward,
                credited: false,
                tasks_completed: account.tasks_completed,
            },
        })
    }

    pub async fn account(&self, wallet: &WalletAddress) -> Result<Account> {
        self.store
            .find_account(wallet)
            .await?
            .ok_or_else(|| SpreeError::NotFound(format!("account {wallet}")))
    }

    pub async fn stats(&self, wallet: &WalletAddress) -> Result<UserStats> {
        self.store
            .user_stats(wallet)
            .await?
            .ok_or_else(|| SpreeError::NotFound(format!("account {wallet}")))
    }
}
