//! Integer quantity newtypes used throughout the ledger and BTCPay client.
//!
//! Two units are in play and must never be confused: [`Sats`] are real
//! Bitcoin satoshis (invoice/payout amounts), while [`ApiSats`] are the
//! integer API credits that back a user's balance. A `Sats` amount becomes
//! an `ApiSats` amount only by multiplying through a tier's multiplier.

use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Real Bitcoin satoshis, as used in invoice and payout contexts.
#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Sats(pub i64);

/// Integer API credits. Not satoshis.
#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct ApiSats(pub i64);

impl Sats {
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl ApiSats {
    pub const ZERO: ApiSats = ApiSats(0);

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

macro_rules! impl_arith {
    ($t:ty) => {
        impl Add for $t {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $t {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl AddAssign for $t {
            fn add_assign(&mut self, other: Self) {
                *self = *self + other;
            }
        }

        impl SubAssign for $t {
            fn sub_assign(&mut self, other: Self) {
                *self = *self - other;
            }
        }
    };
}

impl_arith!(Sats);
impl_arith!(ApiSats);

impl std::ops::Mul<i64> for Sats {
    type Output = ApiSats;

    /// Applies a tier multiplier, converting real sats into API credits.
    fn mul(self, multiplier: i64) -> ApiSats {
        ApiSats(self.0 * multiplier)
    }
}
