//! Referral ledger: code handling, crediting referrer and referee once per
//! referee, and the bulk "claim referral bonuses" bookkeeping.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::address::WalletAddress;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::model::{ReferralEarnings, ReferralRecord};
use crate::settings::SettingsCache;
use crate::store::{ReferralTerms, Store};

pub const REFERRAL_CODE_LEN: usize = 8;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_LEN: usize = 32;

pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..REFERRAL_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Trim and uppercase a user-supplied code. `None` if it cannot be a code.
pub fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.is_empty() || code.len() > MAX_CODE_LEN {
        return None;
    }
    if !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}

/// Value of the `ref` parameter in a query string (`a=1&ref=CODE`), normalized.
pub fn parse_ref_param(query: &str) -> Option<String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "ref")
        .and_then(|(_, value)| normalize_code(value))
}

pub struct ReferralLedger<S, C = SystemClock> {
    store: Arc<S>,
    settings: Arc<SettingsCache<S, C>>,
    clock: C,
}

impl<S: Store, C: Clock> ReferralLedger<S, C> {
    pub fn new(store: Arc<S>, settings: Arc<SettingsCache<S, C>>, clock: C) -> Self {
        Self { store, settings, clock }
    }

    /// Credit `referee` against the account holding `code`.
    ///
    /// Unknown codes, self-referrals, referees that already have a referrer
    /// and blacklisted parties are all soft no-ops returning `None`.
    pub async fn credit_referral(
        &self,
        code: &str,
        referee: &WalletAddress,
    ) -> Result<Option<ReferralRecord>> {
        let Some(code) = normalize_code(code) else {
            return Ok(None);
        };
        let Some(referrer) = self.store.find_account_by_code(&code).await? else {
            info!(%code, %referee, "unknown referral code ignored");
            return Ok(None);
        };
        if referrer.blacklisted {
            warn!(%code, referrer = %referrer.wallet, "referral refused: referrer blacklisted");
            return Ok(None);
        }
        if let Some(account) = self.store.find_account(referee).await? {
            if account.blacklisted {
                warn!(%referee, "referral refused: referee blacklisted");
                return Ok(None);
            }
            if account.referred_by.is_some() {
                return Ok(None);
            }
        }

        let settings = self.settings.get().await?;
        let terms = ReferralTerms::from(&settings);
        let record = self
            .store
            .process_referral(&code, referee, terms, self.clock.now())
            .await?;

        match &record {
            Some(r) => info!(
                referrer = %r.referrer,
                %referee,
                referrer_bonus = r.referrer_bonus,
                referee_bonus = r.referee_bonus,
                "referral credited"
            ),
            None => info!(%code, %referee, "referral not applied"),
        }
        Ok(record)
    }

    /// Flip every unclaimed record where `wallet` is the referrer. Returns the sum flipped.
    pub async fn mark_referral_bonuses_claimed(
        &self,
        wallet: &WalletAddress,
        digest: Option<&str>,
    ) -> Result<u64> {
        self.store
            .mark_referral_bonuses_claimed(wallet, digest, self.clock.now())
            .await
    }

    pub async fn validate_code(&self, code: &str) -> Result<bool> {
        let Some(code) = normalize_code(code) else {
            return Ok(false);
        };
        Ok(self.store.find_account_by_code(&code).await?.is_some())
    }

    pub async fn earnings(&self, wallet: &WalletAddress) -> Result<ReferralEarnings> {
        let records = self.store.referrals_by_referrer(wallet).await?;
        Ok(ReferralEarnings::from_records(records))
    }
}

/// Holds a validated `ref=` code from the landing URL until the wallet connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferralIntake {
    staged: Option<String>,
}

impl ReferralIntake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the `ref` code from `query` if it belongs to an account.
    /// An invalid code leaves any previously staged code in place.
    pub async fn stage_from_query<S: Store>(
        &mut self,
        store: &S,
        query: &str,
    ) -> Result<Option<&str>> {
        if let Some(code) = parse_ref_param(query) {
            if store.find_account_by_code(&code).await?.is_some() {
                self.staged = Some(code);
            } else {
                info!(%code, "ignoring unknown referral code from URL");
            }
        }
        Ok(self.staged.as_deref())
    }

    pub fn staged(&self) -> Option<&str> {
        self.staged.as_deref()
    }

    /// Hand the staged code to account creation; it is consumed.
    pub fn take(&mut self) -> Option<String> {
        self.staged.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_code_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let code = random_code(&mut rng);
            assert_eq!(code.len(), REFERRAL_CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" r1code "), Some("R1CODE".into()));
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code("bad code"), None);
        assert_eq!(normalize_code("DROP;TABLE"), None);
    }

    #[test]
    fn test_parse_ref_param() {
        assert_eq!(parse_ref_param("?ref=ab12CD"), Some("AB12CD".into()));
        assert_eq!(parse_ref_param("utm=x&ref=R1CODE&y=2"), Some("R1CODE".into()));
        assert_eq!(parse_ref_param("referrer=R1CODE"), None);
        assert_eq!(parse_ref_param(""), None);
    }
}
