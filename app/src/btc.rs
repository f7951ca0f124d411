//! Bitcoin amount types and network selection. All ledger amounts are integer
//! satoshis; millisatoshis only appear at the Lightning gateway edge.

use std::ops::{Add, AddAssign, Sub, SubAssign};

#[cfg(all(feature = "mainnet", feature = "testnet"))]
compile_error!("mainnet and testnet cannot be enabled at the same time");

#[cfg(feature = "mainnet")]
pub(crate) const CURRENCY: lightning_invoice::Currency = lightning_invoice::Currency::Bitcoin;

#[cfg(feature = "testnet")]
pub(crate) const CURRENCY: lightning_invoice::Currency =
    lightning_invoice::Currency::BitcoinTestnet;

#[cfg(all(not(feature = "mainnet"), not(feature = "testnet")))]
pub(crate) const CURRENCY: lightning_invoice::Currency = lightning_invoice::Currency::Regtest;

#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq)]
pub struct Sats(pub i64);

#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq)]
pub struct MilliSats(pub i64);

impl Sats {
    pub fn msats(self) -> MilliSats {
        MilliSats(self.0 * 1000)
    }
}

impl MilliSats {
    pub fn sats_floor(self) -> Sats {
        Sats(self.0 / 1000)
    }

    /// Rounds up to whole satoshis. Used when debiting, so a sub-satoshi
    /// remainder can never leave the ledger short.
    pub fn sats_ceil(self) -> Sats {
        Sats((self.0 + 999) / 1000)
    }
}

impl Add for Sats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Sats {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Sats {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl SubAssign for Sats {
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Add for MilliSats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for MilliSats {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(MilliSats(1999).sats_floor(), Sats(1));
        assert_eq!(MilliSats(1999).sats_ceil(), Sats(2));
        assert_eq!(MilliSats(2000).sats_ceil(), Sats(2));
        assert_eq!(Sats(5).msats(), MilliSats(5000));
    }
}
