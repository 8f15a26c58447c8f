//! Token allocation draws.
//!
//! The base reward leans toward the top of the configured range:
//! `amount = floor(min + (max - min) * (1 - u^2))` with `u ~ U[0, 1)`,
//! plus a per-wallet offset so identical draws still differ slightly.
//! Platform rewards are uniform over their own range.

use rand::Rng;

use crate::address::WalletAddress;
use crate::model::Platform;
use crate::settings::{CampaignSettings, RewardRange};

pub const WALLET_OFFSET_MODULUS: u64 = 100;

/// Tie-breaker derived from the address text. Not a security property.
pub fn wallet_offset(wallet: &WalletAddress) -> u64 {
    wallet.char_code_sum() % WALLET_OFFSET_MODULUS
}

/// Upper-biased draw in `[range.min, range.max]`.
pub fn biased_amount<R: Rng + ?Sized>(range: RewardRange, rng: &mut R) -> u64 {
    let u: f64 = rng.gen();
    let biased = u * u;
    let span = range.max.saturating_sub(range.min) as f64;
    let amount = (range.min as f64 + span * (1.0 - biased)).floor() as u64;
    amount.clamp(range.min, range.max.max(range.min))
}

pub fn generate_base_reward<R: Rng + ?Sized>(
    settings: &CampaignSettings,
    wallet: &WalletAddress,
    rng: &mut R,
) -> u64 {
    biased_amount(settings.token_range, rng) + wallet_offset(wallet)
}

pub fn generate_platform_reward<R: Rng + ?Sized>(
    platform: Platform,
    settings: &CampaignSettings,
    rng: &mut R,
) -> u64 {
    let range = settings.platform_range(platform);
    if range.min >= range.max {
        return range.min;
    }
    rng.gen_range(range.min..=range.max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SAMPLES: usize = 20_000;

    #[test]
    fn test_biased_amount_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for range in [
            RewardRange { min: 100, max: 10_000 },
            RewardRange { min: 0, max: 1 },
            RewardRange { min: 42, max: 43 },
        ] {
            for _ in 0..SAMPLES {
                let amount = biased_amount(range, &mut rng);
                assert!(range.contains(amount), "{amount} outside {range:?}");
            }
        }
    }

    #[test]
    fn test_biased_amount_leans_high() {
        let range = RewardRange { min: 100, max: 10_000 };
        let mut rng = StdRng::seed_from_u64(11);
        let total: u64 = (0..SAMPLES).map(|_| biased_amount(range, &mut rng)).sum();
        let mean = total as f64 / SAMPLES as f64;
        let midpoint = (range.min + range.max) as f64 / 2.0;
        // E[1 - u^2] = 2/3, so the mean sits near min + 2/3 * span.
        assert!(mean > midpoint, "mean {mean} should exceed midpoint {midpoint}");
    }

    #[test]
    fn test_degenerate_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let range = RewardRange { min: 500, max: 500 };
        assert_eq!(biased_amount(range, &mut rng), 500);
    }

    #[test]
    fn test_base_reward_adds_wallet_offset() {
        let wallet = WalletAddress::parse("0xabc123").unwrap();
        let settings = CampaignSettings::default();
        let offset = wallet_offset(&wallet);
        assert_eq!(offset, wallet.char_code_sum() % 100);

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..1_000 {
            let reward = generate_base_reward(&settings, &wallet, &mut rng);
            assert!(reward >= 100 + offset && reward <= 10_000 + offset);
        }
    }

    #[test]
    fn test_same_seed_same_reward() {
        let wallet = WalletAddress::parse("0xfeed").unwrap();
        let settings = CampaignSettings::default();
        let a = generate_base_reward(&settings, &wallet, &mut StdRng::seed_from_u64(5));
        let b = generate_base_reward(&settings, &wallet, &mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_platform_reward_uniform_range() {
        let settings = CampaignSettings::default();
        let mut rng = StdRng::seed_from_u64(1);
        for platform in Platform::ALL {
            for _ in 0..1_000 {
                let reward = generate_platform_reward(platform, &settings, &mut rng);
                assert!((50..=499).contains(&reward));
            }
        }
    }
}
