use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpreeError};

/// Sui-style account address: `0x` followed by up to 64 hex digits, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub const MAX_HEX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| SpreeError::Validation(format!("address must start with 0x: {raw}")))?;

        if hex.is_empty() || hex.len() > Self::MAX_HEX_LEN {
            return Err(SpreeError::Validation(format!(
                "address must carry 1..={} hex digits: {raw}",
                Self::MAX_HEX_LEN
            )));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SpreeError::Validation(format!("address is not hex: {raw}")));
        }

        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sum of the character codes of the textual address.
    pub fn char_code_sum(&self) -> u64 {
        self.0.chars().map(|c| c as u64).sum()
    }

    /// `0x1234...abcd` form used in listings.
    pub fn short(&self) -> String {
        if self.0.len() <= 10 {
            return self.0.clone();
        }
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WalletAddress {
    type Err = SpreeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = SpreeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let addr = WalletAddress::parse(" 0xABC123 ").unwrap();
        assert_eq!(addr.as_str(), "0xabc123");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(WalletAddress::parse("abc123").is_err());
        assert!(WalletAddress::parse("0x").is_err());
        assert!(WalletAddress::parse("0xzz").is_err());
        assert!(WalletAddress::parse(&format!("0x{}", "a".repeat(65))).is_err());
    }

    #[test]
    fn test_char_code_sum() {
        let addr = WalletAddress::parse("0xab").unwrap();
        // '0' + 'x' + 'a' + 'b'
        assert_eq!(addr.char_code_sum(), 48 + 120 + 97 + 98);
    }

    #[test]
    fn test_short_form() {
        let addr = WalletAddress::parse(
            "0xd454246c6fdf36cadc2e2cc02d42e1faed1b97da00b371da6f48c38e1ac21b7c",
        )
        .unwrap();
        assert_eq!(addr.short(), "0xd454...1b7c");
    }
}
