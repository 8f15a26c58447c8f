//! # spree-sdk
//!
//! Core of the WheatChain token spree: accounts, reward draws, referrals,
//! campaign settings and the on-chain claim flow.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spree_sdk::{
//!     MemoryStore, Registrar, SettingsCache, SystemClock, WalletAddress, DEFAULT_SETTINGS_TTL,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! let settings = Arc::new(SettingsCache::new(store.clone(), SystemClock, DEFAULT_SETTINGS_TTL));
//! let registrar = Registrar::new(store, settings, SystemClock);
//!
//! let wallet = WalletAddress::parse("0xd454...")?;
//! let account = registrar.ensure_account(&wallet, Some("R1CODE"), None).await?;
//! ```
//!
//! Storage goes through the [`Store`] trait. [`MemoryStore`] is always
//! available; the `postgres` feature adds `PgStore`.

pub mod address;
pub mod chain;
pub mod claim;
pub mod clock;
pub mod error;
pub mod model;
pub mod referral;
pub mod registrar;
pub mod rewards;
pub mod settings;
pub mod store;

pub use address::WalletAddress;
pub use chain::{
    ClaimExecution, ClaimTransaction, DistributorConfig, ExecutionLookup, ExecutionReceipt,
    ExecutionStatus, WalletProvider,
};
pub use claim::{
    check_eligibility, claimable_amount, finalize_claim, finalize_reported_claim, ClaimConfig,
    ClaimKind, ClaimOrchestrator, ClaimReceipt, ClaimStep, ReportedClaim,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, SpreeError};
pub use model::{
    Account, AccountQuery, ActivityEntry, ActivityKind, CampaignStats, ClientMeta, Platform,
    PlatformTask, ReferralEarnings, ReferralRecord, ReferrerSummary, UserStats,
};
pub use referral::{ReferralIntake, ReferralLedger};
pub use registrar::{Registrar, TaskReport};
pub use settings::{CampaignSettings, Countdown, RewardRange, SettingsCache, DEFAULT_SETTINGS_TTL};
pub use store::{AdminStore, MemoryStore, SettingsSource, Store};
#[cfg(feature = "postgres")]
pub use store::PgStore;
