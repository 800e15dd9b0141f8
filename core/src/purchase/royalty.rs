//! Best-effort royalty side-payout triggered by every settled invoice.
//! Never raises; never blocks or reverses credit settlement.

use serde::Serialize;

use crate::btcpay::BtcPayClient;
use crate::constants::ROYALTY_PAYOUT_MAX_SATS;
use crate::units::Sats;

#[derive(Debug, Clone)]
pub struct RoyaltyConfig {
    /// Lightning Address payout destination. `None` or empty disables
    /// royalty payouts entirely.
    pub address: Option<String>,
    pub percent: f64,
    pub min_sats: Sats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum RoyaltyOutcome {
    /// Royalty disabled, or the computed amount is below the configured
    /// minimum.
    Skipped,
    /// Computed amount exceeds [`ROYALTY_PAYOUT_MAX_SATS`]; the provider
    /// was never called.
    Refused { royalty_sats: i64 },
    /// The provider rejected the payout.
    Failed { royalty_sats: i64, error: String },
    Paid { royalty_sats: i64, payout_id: String },
}

/// Attempts a royalty payout against `amount_sats`, the real sat amount of
/// a just-settled invoice.
pub async fn attempt_royalty_payout(
    btcpay: &BtcPayClient,
    amount_sats: Sats,
    config: &RoyaltyConfig,
) -> RoyaltyOutcome {
    let Some(address) = config.address.as_deref().filter(|a| !a.is_empty()) else {
        return RoyaltyOutcome::Skipped;
    };

    let royalty_sats = Sats(((amount_sats.0 as f64) * config.percent).floor() as i64);
    if royalty_sats < config.min_sats {
        return RoyaltyOutcome::Skipped;
    }
    if royalty_sats > ROYALTY_PAYOUT_MAX_SATS {
        log::error!(
            "royalty payout of {} sats exceeds ceiling {}; refusing without calling the provider",
            royalty_sats.0,
            ROYALTY_PAYOUT_MAX_SATS.0
        );
        return RoyaltyOutcome::Refused {
            royalty_sats: royalty_sats.0,
        };
    }

    match btcpay.create_payout(address, royalty_sats).await {
        Ok(resp) => RoyaltyOutcome::Paid {
            royalty_sats: royalty_sats.0,
            payout_id: resp.id,
        },
        Err(err) => {
            log::warn!("royalty payout of {} sats failed: {err}", royalty_sats.0);
            RoyaltyOutcome::Failed {
                royalty_sats: royalty_sats.0,
                error: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(address: Option<&str>) -> RoyaltyConfig {
        RoyaltyConfig {
            address: address.map(str::to_owned),
            percent: 0.02,
            min_sats: Sats(10),
        }
    }

    #[tokio::test]
    async fn disabled_when_no_address() {
        let btcpay = BtcPayClient::new("https://btcpay.example.com", "store", "key");
        let outcome = attempt_royalty_payout(&btcpay, Sats(980), &config(None)).await;
        assert!(matches!(outcome, RoyaltyOutcome::Skipped));
    }

    #[tokio::test]
    async fn below_minimum_is_skipped() {
        let btcpay = BtcPayClient::new("https://btcpay.example.com", "store", "key");
        // floor(100 * 0.02) = 2, below min_sats=10
        let outcome = attempt_royalty_payout(&btcpay, Sats(100), &config(Some("addr"))).await;
        assert!(matches!(outcome, RoyaltyOutcome::Skipped));
    }

    #[tokio::test]
    async fn above_ceiling_is_refused_without_network_call() {
        let btcpay = BtcPayClient::new("https://btcpay.example.com", "store", "key");
        // floor(10_000_000 * 0.02) = 200_000 > ROYALTY_PAYOUT_MAX_SATS (100_000)
        let outcome = attempt_royalty_payout(&btcpay, Sats(10_000_000), &config(Some("addr"))).await;
        assert!(matches!(
            outcome,
            RoyaltyOutcome::Refused { royalty_sats: 200_000 }
        ));
    }
}
