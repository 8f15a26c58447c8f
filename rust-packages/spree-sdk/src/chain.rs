//! On-chain side of a claim: unit conversion, the distributor call template
//! and the wallet seam that signs and executes it.
//!
//! The claim transaction pays the claimant from the campaign distributor.
//! The claimant's own native balance is only checked against the gas
//! reserve; it is never moved by a claim.

use std::future::Future;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::address::WalletAddress;
use crate::claim::ClaimKind;
use crate::error::{Result, SpreeError};

pub const TOKEN_DECIMALS: u32 = 9;
pub const BASE_UNITS_PER_TOKEN: u64 = 10u64.pow(TOKEN_DECIMALS);
pub const TOKEN_SYMBOL: &str = "SWHIT";

/// 0.1 of the native coin, kept back for gas.
pub const GAS_RESERVE: u64 = 100_000_000;
pub const DEFAULT_GAS_BUDGET: u64 = 50_000_000;

pub fn to_base_units(tokens: u64) -> Result<u64> {
    tokens
        .checked_mul(BASE_UNITS_PER_TOKEN)
        .ok_or_else(|| SpreeError::Validation(format!("{tokens} tokens overflow base units")))
}

/// `1234500000000` -> `"1,234.5"`.
pub fn format_amount(base_units: u64) -> String {
    let whole = base_units / BASE_UNITS_PER_TOKEN;
    let frac = base_units % BASE_UNITS_PER_TOKEN;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if frac == 0 {
        return grouped;
    }
    let frac = format!("{:0width$}", frac, width = TOKEN_DECIMALS as usize);
    format!("{grouped}.{}", frac.trim_end_matches('0'))
}

pub fn ensure_gas_reserve(balance: u64, reserve: u64) -> Result<()> {
    if balance <= reserve {
        return Err(SpreeError::InsufficientBalance { balance, reserve });
    }
    Ok(())
}

/// Where claims are paid from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorConfig {
    pub package_id: String,
    pub module: String,
    pub distributor_id: String,
    pub gas_budget: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            package_id: "0x4620b72b7bb95bc3c72bcaf26ef76cddaf57f2a5d808bad64ee1f45e5ade7549".into(),
            module: "spree".into(),
            distributor_id: "0xd93b88f6b5bbf969abf40eb8192242d21038aa33b9f46958f109f0ce30e66f37"
                .into(),
            gas_budget: DEFAULT_GAS_BUDGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CallArg {
    Object(String),
    U64(u64),
    Address(String),
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MoveCall {
    pub package: String,
    pub module: String,
    pub function: String,
    pub arguments: Vec<CallArg>,
}

/// Fixed-shape claim: one distributor call paying `amount` base units to `sender`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ClaimTransaction {
    pub sender: String,
    pub call: MoveCall,
    pub gas_budget: u64,
}

impl ClaimTransaction {
    pub fn build(
        distributor: &DistributorConfig,
        kind: ClaimKind,
        tokens: u64,
        claimant: &WalletAddress,
    ) -> Result<Self> {
        if tokens == 0 {
            return Err(SpreeError::Validation("claim amount must be positive".into()));
        }
        let amount = to_base_units(tokens)?;

        Ok(Self {
            sender: claimant.to_string(),
            call: MoveCall {
                package: distributor.package_id.clone(),
                module: distributor.module.clone(),
                function: Self::entry_function(kind).into(),
                arguments: vec![
                    CallArg::Object(distributor.distributor_id.clone()),
                    CallArg::U64(amount),
                    CallArg::Address(claimant.to_string()),
                ],
            },
            gas_budget: distributor.gas_budget,
        })
    }

    pub fn entry_function(kind: ClaimKind) -> &'static str {
        match kind {
            ClaimKind::Tokens => "claim_allocation",
            ClaimKind::ReferralBonuses => "claim_referral_bonus",
        }
    }

    /// True when this is `kind`'s distributor call, sent by and paying `claimant`.
    pub fn is_claim_for(
        &self,
        distributor: &DistributorConfig,
        kind: ClaimKind,
        claimant: &WalletAddress,
    ) -> bool {
        let claimant = claimant.as_str();
        let distributor_arg = self.call.arguments.first()
            == Some(&CallArg::Object(distributor.distributor_id.clone()));

        self.sender == claimant
            && self.recipient() == Some(claimant)
            && self.call.package == distributor.package_id
            && self.call.module == distributor.module
            && self.call.function == Self::entry_function(kind)
            && distributor_arg
    }

    pub fn amount(&self) -> Option<u64> {
        self.call.arguments.iter().find_map(|arg| match arg {
            CallArg::U64(v) => Some(*v),
            _ => None,
        })
    }

    pub fn recipient(&self) -> Option<&str> {
        self.call.arguments.iter().find_map(|arg| match arg {
            CallArg::Address(a) => Some(a.as_str()),
            _ => None,
        })
    }

    /// Bytes handed to the signer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        borsh::to_vec(self).map_err(|e| SpreeError::Validation(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure { error: String },
}

/// Result of a submitted transaction as reported by the executing network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub digest: String,
    #[serde(flatten)]
    pub status: ExecutionStatus,
}

impl ExecutionReceipt {
    pub fn success(digest: impl Into<String>) -> Self {
        Self { digest: digest.into(), status: ExecutionStatus::Success }
    }

    pub fn failure(digest: impl Into<String>, error: impl Into<String>) -> Self {
        Self { digest: digest.into(), status: ExecutionStatus::Failure { error: error.into() } }
    }

    /// Submission without a local error is not enough; the status must say success.
    pub fn ensure_success(&self) -> Result<()> {
        match &self.status {
            ExecutionStatus::Success => Ok(()),
            ExecutionStatus::Failure { error } => Err(SpreeError::Execution {
                digest: self.digest.clone(),
                reason: error.clone(),
            }),
        }
    }
}

/// A transaction as the network executed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimExecution {
    pub transaction: ClaimTransaction,
    pub receipt: ExecutionReceipt,
}

/// Read side of the chain: resolves a digest reported by a client into the
/// transaction that was actually executed.
pub trait ExecutionLookup: Send + Sync {
    /// `Ok(None)` when the network knows no transaction with this digest.
    fn claim_execution(
        &self,
        digest: &str,
    ) -> impl Future<Output = Result<Option<ClaimExecution>>> + Send;
}

/// Connected wallet able to sign and execute on the user's behalf.
pub trait WalletProvider: Send + Sync {
    fn address(&self) -> &WalletAddress;

    fn native_balance(&self) -> impl Future<Output = Result<u64>> + Send;

    /// `Err` means submission failed; an `Ok` receipt may still carry a failure status.
    fn sign_and_execute(
        &self,
        tx: &ClaimTransaction,
    ) -> impl Future<Output = Result<ExecutionReceipt>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_unit_scaling() {
        assert_eq!(BASE_UNITS_PER_TOKEN, 1_000_000_000);
        assert_eq!(to_base_units(1_234).unwrap(), 1_234_000_000_000);
        assert!(to_base_units(u64::MAX).is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0");
        assert_eq!(format_amount(1_234_500_000_000), "1,234.5");
        assert_eq!(format_amount(1_000_000_000_000_000), "1,000,000");
        assert_eq!(format_amount(1), "0.000000001");
    }

    #[test]
    fn test_gas_reserve() {
        assert!(ensure_gas_reserve(GAS_RESERVE + 1, GAS_RESERVE).is_ok());
        assert!(matches!(
            ensure_gas_reserve(GAS_RESERVE, GAS_RESERVE),
            Err(SpreeError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_claim_pays_claimant() {
        let claimant = WalletAddress::parse("0xabc123").unwrap();
        let tx = ClaimTransaction::build(
            &DistributorConfig::default(),
            ClaimKind::Tokens,
            7_500,
            &claimant,
        )
        .unwrap();

        assert_eq!(tx.sender, "0xabc123");
        assert_eq!(tx.recipient(), Some("0xabc123"));
        assert_eq!(tx.amount(), Some(7_500 * BASE_UNITS_PER_TOKEN));
        assert_eq!(tx.call.function, "claim_allocation");

        let bytes = tx.to_bytes().unwrap();
        assert_eq!(ClaimTransaction::try_from_slice(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_claim_shape_check() {
        let distributor = DistributorConfig::default();
        let claimant = WalletAddress::parse("0xabc123").unwrap();
        let other = WalletAddress::parse("0xdef456").unwrap();
        let tx =
            ClaimTransaction::build(&distributor, ClaimKind::Tokens, 10, &claimant).unwrap();

        assert!(tx.is_claim_for(&distributor, ClaimKind::Tokens, &claimant));
        assert!(!tx.is_claim_for(&distributor, ClaimKind::Tokens, &other));
        assert!(!tx.is_claim_for(&distributor, ClaimKind::ReferralBonuses, &claimant));

        let elsewhere = DistributorConfig { distributor_id: "0x99".into(), ..distributor.clone() };
        assert!(!tx.is_claim_for(&elsewhere, ClaimKind::Tokens, &claimant));

        let mut redirected = tx.clone();
        redirected.call.arguments[2] = CallArg::Address(other.to_string());
        assert!(!redirected.is_claim_for(&distributor, ClaimKind::Tokens, &claimant));
    }

    #[test]
    fn test_zero_claim_rejected() {
        let claimant = WalletAddress::parse("0xabc").unwrap();
        assert!(ClaimTransaction::build(
            &DistributorConfig::default(),
            ClaimKind::ReferralBonuses,
            0,
            &claimant
        )
        .is_err());
    }

    #[test]
    fn test_receipt_status() {
        assert!(ExecutionReceipt::success("D1").ensure_success().is_ok());
        let err = ExecutionReceipt::failure("D2", "MoveAbort").ensure_success().unwrap_err();
        assert!(matches!(err, SpreeError::Execution { ref digest, .. } if digest == "D2"));

        let parsed: ExecutionReceipt =
            serde_json::from_str(r#"{"digest":"D3","status":"success"}"#).unwrap();
        assert_eq!(parsed, ExecutionReceipt::success("D3"));
    }
}
