//! Send/receive amount limits. These reject before any I/O or ledger write
//! happens, so a violation can never leave a partial operation behind.

use crate::btc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("amount too low")]
    AmountTooLow,
    #[error("amount too high")]
    AmountTooHigh,
    #[error("daily limit exceeded")]
    DailyLimitExceeded,
}

#[derive(Debug)]
pub struct CashLimits {
    pub min: btc::Sats,
    pub max: btc::Sats,
    pub daily: btc::Sats,
}

#[derive(Debug)]
pub(crate) struct Amounts {
    /// Send or receive amount.
    pub amount: btc::Sats,
    /// Total amount sent/received in the trailing 24 hours.
    pub daily_total: btc::Sats,
}

impl CashLimits {
    pub(crate) fn check(
        &self,
        Amounts {
            amount,
            daily_total,
        }: Amounts,
    ) -> Result<(), Error> {
        if amount < self.min {
            Err(Error::AmountTooLow)
        } else if amount > self.max {
            Err(Error::AmountTooHigh)
        } else if daily_total + amount > self.daily {
            Err(Error::DailyLimitExceeded)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> CashLimits {
        CashLimits {
            min: btc::Sats(10),
            max: btc::Sats(1_000_000),
            daily: btc::Sats(2_000_000),
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        let check = |amount, daily_total| {
            limits().check(Amounts {
                amount: btc::Sats(amount),
                daily_total: btc::Sats(daily_total),
            })
        };
        assert!(check(10, 0).is_ok());
        assert!(check(1_000_000, 0).is_ok());
        assert!(matches!(check(9, 0), Err(Error::AmountTooLow)));
        assert!(matches!(check(1_000_001, 0), Err(Error::AmountTooHigh)));
        assert!(check(1_000_000, 1_000_000).is_ok());
        assert!(matches!(
            check(1_000_000, 1_000_001),
            Err(Error::DailyLimitExceeded)
        ));
    }
}
