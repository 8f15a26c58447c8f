//! Claim orchestration.
//!
//! `Idle -> Preparing -> Processing -> Finalizing -> Done`, with `Error`
//! reachable from every non-idle step. Records are only marked claimed after
//! the executed transaction reports success, and a failed record write
//! after an on-chain success is retried through [`ClaimOrchestrator::retry_finalize`]
//! without submitting a second transaction.
//!
//! Claims executed outside the orchestrator are recorded through
//! [`finalize_reported_claim`], which trusts nothing but the digest and
//! re-reads the executed transaction from the chain.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::address::WalletAddress;
use crate::chain::{
    ensure_gas_reserve, to_base_units, ClaimTransaction, DistributorConfig, ExecutionLookup,
    ExecutionReceipt, WalletProvider, GAS_RESERVE,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SpreeError};
use crate::model::{Account, ActivityKind};
use crate::settings::{CampaignSettings, SettingsCache};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// Base and task rewards plus every referral bonus not yet claimed.
    Tokens,
    /// Unclaimed referral records where the account is the referrer.
    ReferralBonuses,
}

impl ClaimKind {
    fn activity(self) -> ActivityKind {
        match self {
            ClaimKind::Tokens => ActivityKind::TokensClaimed,
            ClaimKind::ReferralBonuses => ActivityKind::ReferralBonusesClaimed,
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimKind::Tokens => f.write_str("token claim"),
            ClaimKind::ReferralBonuses => f.write_str("referral bonus claim"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "error", rename_all = "snake_case")]
pub enum ClaimStep {
    Idle,
    Preparing,
    Processing,
    Finalizing,
    Done,
    Error(String),
}

impl ClaimStep {
    /// Re-submission must be disabled while busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, ClaimStep::Preparing | ClaimStep::Processing | ClaimStep::Finalizing)
    }
}

#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Pause before the transaction is built. Cosmetic.
    pub preparing_delay: Duration,
    /// Pause before records are written. Cosmetic.
    pub finalizing_delay: Duration,
    pub gas_reserve: u64,
    pub distributor: DistributorConfig,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            preparing_delay: Duration::from_secs(1),
            finalizing_delay: Duration::from_secs(1),
            gas_reserve: GAS_RESERVE,
            distributor: DistributorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub kind: ClaimKind,
    pub wallet: WalletAddress,
    /// Tokens recorded as claimed by this call; zero when already recorded.
    pub amount: u64,
    pub digest: String,
    pub claimed_at: DateTime<Utc>,
}

/// Record a confirmed claim. Refuses receipts without a success status; a
/// store failure after a success is reported as `Consistency`.
pub async fn finalize_claim<S: Store>(
    store: &S,
    kind: ClaimKind,
    wallet: &WalletAddress,
    receipt: &ExecutionReceipt,
    now: DateTime<Utc>,
) -> Result<ClaimReceipt> {
    receipt.ensure_success()?;

    let written = match kind {
        ClaimKind::Tokens => {
            store.mark_tokens_claimed(wallet, &receipt.digest, now).await.map(|mark| mark.amount())
        }
        ClaimKind::ReferralBonuses => {
            store
                .mark_referral_bonuses_claimed(wallet, Some(receipt.digest.as_str()), now)
                .await
        }
    };

    match written {
        Ok(amount) => Ok(ClaimReceipt {
            kind,
            wallet: wallet.clone(),
            amount,
            digest: receipt.digest.clone(),
            claimed_at: now,
        }),
        Err(err) => {
            error!(
                %wallet,
                digest = %receipt.digest,
                %kind,
                error = %err,
                "on-chain claim succeeded but records were not updated"
            );
            Err(SpreeError::Consistency {
                kind,
                digest: receipt.digest.clone(),
                source: Box::new(err),
            })
        }
    }
}

async fn find_account<S: Store>(store: &S, wallet: &WalletAddress) -> Result<Account> {
    store
        .find_account(wallet)
        .await?
        .ok_or_else(|| SpreeError::NotFound(format!("account {wallet}")))
}

async fn unclaimed_bonus<S: Store>(store: &S, wallet: &WalletAddress) -> Result<u64> {
    Ok(store
        .referrals_by_referrer(wallet)
        .await?
        .iter()
        .filter(|r| !r.claimed)
        .map(|r| r.referrer_bonus)
        .sum())
}

/// Tokens a claim of `kind` would pay right now. A token claim carries the
/// unclaimed referral bonuses with it.
pub async fn claimable_amount<S: Store>(
    store: &S,
    kind: ClaimKind,
    wallet: &WalletAddress,
) -> Result<u64> {
    match kind {
        ClaimKind::Tokens => {
            let account = find_account(store, wallet).await?;
            if account.claimed {
                return Ok(0);
            }
            Ok(account.allocation().saturating_add(unclaimed_bonus(store, wallet).await?))
        }
        ClaimKind::ReferralBonuses => unclaimed_bonus(store, wallet).await,
    }
}

/// Guards every claim path runs before paying or recording. Returns the
/// claimable amount.
pub async fn check_eligibility<S: Store>(
    store: &S,
    settings: &CampaignSettings,
    kind: ClaimKind,
    wallet: &WalletAddress,
    now: DateTime<Utc>,
) -> Result<u64> {
    if !settings.is_active(now) {
        return Err(SpreeError::CampaignInactive);
    }

    let account = find_account(store, wallet).await?;
    if account.blacklisted {
        return Err(SpreeError::Blacklisted(wallet.to_string()));
    }
    if kind == ClaimKind::Tokens {
        if account.claimed {
            return Err(SpreeError::AlreadyClaimed);
        }
        if !account.tasks_completed && !account.has_connected_all(&settings.required_platforms) {
            let required: Vec<_> =
                settings.required_platforms.iter().map(|p| p.as_str()).collect();
            return Err(SpreeError::TasksIncomplete(required.join(", ")));
        }
    }

    let amount = claimable_amount(store, kind, wallet).await?;
    if amount == 0 {
        return Err(SpreeError::NothingToClaim);
    }
    Ok(amount)
}

/// A claim the client says it executed itself.
#[derive(Debug, Clone, Copy)]
pub struct ReportedClaim<'a> {
    pub kind: ClaimKind,
    pub wallet: &'a WalletAddress,
    pub digest: &'a str,
}

/// Record a claim from its digest alone. The executed transaction is read
/// back from the chain and must be `kind`'s distributor call, sent by and
/// paying `wallet`, with a success status and no more than the eligible
/// amount. A digest already recorded for this wallet returns a zero-amount
/// receipt without touching any record.
pub async fn finalize_reported_claim<S: Store, L: ExecutionLookup>(
    store: &S,
    lookup: &L,
    distributor: &DistributorConfig,
    settings: &CampaignSettings,
    report: ReportedClaim<'_>,
    now: DateTime<Utc>,
) -> Result<ClaimReceipt> {
    let ReportedClaim { kind, wallet, digest } = report;

    let execution = lookup
        .claim_execution(digest)
        .await?
        .ok_or_else(|| SpreeError::NotFound(format!("transaction {digest}")))?;
    if execution.receipt.digest != digest {
        return Err(SpreeError::Validation(format!("transaction {digest} digest mismatch")));
    }
    if !execution.transaction.is_claim_for(distributor, kind, wallet) {
        warn!(%wallet, digest, %kind, "reported transaction is not this wallet's claim");
        return Err(SpreeError::Validation(format!(
            "transaction {digest} is not a {kind} for {wallet}"
        )));
    }
    execution.receipt.ensure_success()?;

    let account = find_account(store, wallet).await?;
    if account.blacklisted {
        return Err(SpreeError::Blacklisted(wallet.to_string()));
    }
    let recorded = store.activity(wallet).await?.into_iter().find(|entry| {
        entry.kind == kind.activity() && entry.metadata["digest"].as_str() == Some(digest)
    });
    if let Some(entry) = recorded {
        return Ok(ClaimReceipt {
            kind,
            wallet: wallet.clone(),
            amount: 0,
            digest: digest.to_string(),
            claimed_at: entry.created_at,
        });
    }

    let eligible = check_eligibility(store, settings, kind, wallet, now).await?;
    let paid = execution.transaction.amount().unwrap_or(0);
    if paid > to_base_units(eligible)? {
        warn!(%wallet, digest, paid, eligible, %kind, "reported claim paid more than eligible");
        return Err(SpreeError::Validation(format!(
            "transaction {digest} pays more than the {eligible} tokens claimable"
        )));
    }

    finalize_claim(store, kind, wallet, &execution.receipt, now).await
}

pub type CompletionCallback = Box<dyn Fn(&ClaimReceipt) + Send + Sync>;

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one wallet's claims. At most one attempt is in flight at a time.
pub struct ClaimOrchestrator<S, W, C = SystemClock> {
    store: Arc<S>,
    wallet: W,
    settings: Arc<SettingsCache<S, C>>,
    clock: C,
    config: ClaimConfig,
    step: watch::Sender<ClaimStep>,
    in_flight: AtomicBool,
    callbacks: Vec<CompletionCallback>,
}

impl<S, W, C> ClaimOrchestrator<S, W, C>
where
    S: Store,
    W: WalletProvider,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        wallet: W,
        settings: Arc<SettingsCache<S, C>>,
        clock: C,
        config: ClaimConfig,
    ) -> Self {
        let (step, _) = watch::channel(ClaimStep::Idle);
        Self {
            store,
            wallet,
            settings,
            clock,
            config,
            step,
            in_flight: AtomicBool::new(false),
            callbacks: Vec::new(),
        }
    }

    /// Run after a claim reaches `Done`.
    pub fn on_complete(mut self, callback: impl Fn(&ClaimReceipt) + Send + Sync + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ClaimStep> {
        self.step.subscribe()
    }

    pub fn step(&self) -> ClaimStep {
        self.step.borrow().clone()
    }

    pub async fn claimable(&self, kind: ClaimKind) -> Result<u64> {
        claimable_amount(&*self.store, kind, self.wallet.address()).await
    }

    /// User-initiated claim. Guard failures return an error and leave the step at `Idle`.
    pub async fn claim(&self, kind: ClaimKind) -> Result<ClaimReceipt> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(SpreeError::ClaimInProgress);
        }
        let _guard = InFlight(&self.in_flight);

        let settings = self.settings.get().await?;
        let wallet = self.wallet.address();
        let amount =
            check_eligibility(&*self.store, &settings, kind, wallet, self.clock.now()).await?;

        let result = self.run(kind, amount).await;
        match &result {
            Ok(receipt) => {
                self.step.send_replace(ClaimStep::Done);
                info!(
                    wallet = %receipt.wallet,
                    digest = %receipt.digest,
                    amount = receipt.amount,
                    %kind,
                    "claim complete"
                );
                for callback in &self.callbacks {
                    callback(receipt);
                }
            }
            Err(err) => {
                warn!(wallet = %self.wallet.address(), %kind, error = %err, "claim failed");
                self.step.send_replace(ClaimStep::Error(err.to_string()));
            }
        }
        result
    }

    /// Re-run only the record write for a transaction already confirmed on-chain.
    pub async fn retry_finalize(&self, kind: ClaimKind, digest: &str) -> Result<ClaimReceipt> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(SpreeError::ClaimInProgress);
        }
        let _guard = InFlight(&self.in_flight);

        self.step.send_replace(ClaimStep::Finalizing);
        let receipt = ExecutionReceipt::success(digest);
        let result =
            finalize_claim(&*self.store, kind, self.wallet.address(), &receipt, self.clock.now())
                .await;
        match &result {
            Ok(receipt) => {
                self.step.send_replace(ClaimStep::Done);
                for callback in &self.callbacks {
                    callback(receipt);
                }
            }
            Err(err) => {
                self.step.send_replace(ClaimStep::Error(err.to_string()));
            }
        }
        result
    }

    async fn run(&self, kind: ClaimKind, amount: u64) -> Result<ClaimReceipt> {
        let wallet = self.wallet.address();

        self.step.send_replace(ClaimStep::Preparing);
        tokio::time::sleep(self.config.preparing_delay).await;

        let balance = self.wallet.native_balance().await?;
        ensure_gas_reserve(balance, self.config.gas_reserve)?;
        let tx = ClaimTransaction::build(&self.config.distributor, kind, amount, wallet)?;

        self.step.send_replace(ClaimStep::Processing);
        let receipt = self.wallet.sign_and_execute(&tx).await?;
        receipt.ensure_success()?;
        info!(%wallet, digest = %receipt.digest, amount, %kind, "claim transaction executed");

        self.step.send_replace(ClaimStep::Finalizing);
        tokio::time::sleep(self.config.finalizing_delay).await;

        finalize_claim(&*self.store, kind, wallet, &receipt, self.clock.now()).await
    }
}
