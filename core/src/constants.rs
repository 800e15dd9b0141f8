//! Bit-exact constants shared across the ledger, BTCPay client, and purchase
//! orchestration. Kept in one place so a future tuning pass touches one file.

use crate::units::Sats;

/// Largest invoice this core will ever create or accept.
pub const MAX_INVOICE_SATS: Sats = Sats(1_000_000);

/// Default low-balance advisory floor, in API credits.
pub const LOW_BALANCE_FLOOR_API_SATS: i64 = 100;

/// Royalty payouts above this are refused outright rather than sent — a
/// guard against a misconfigured rate (e.g. 1.0 instead of 0.01).
pub const ROYALTY_PAYOUT_MAX_SATS: Sats = Sats(100_000);

/// Default sats↔BTC conversion ceiling (1 BTC).
pub const SATS_CONVERSION_MAX_DEFAULT: i64 = 100_000_000;

/// Per-call cost tier, expressed in satoshi-equivalent API credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum ToolTier {
    Free = 0,
    Read = 1,
    Write = 5,
    Heavy = 10,
}

impl ToolTier {
    pub fn cost(self) -> i64 {
        self as i64
    }
}
