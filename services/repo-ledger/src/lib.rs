//! Repo Ledger
//!
//! Tracks the repo tokens a fixed-income yield strategy holds and the
//! auction offers it has outstanding:
//! - Maturity-sorted holdings with valuation and matured redemption
//! - Auction-sorted pending offers reconciled into holdings on completion
//! - Discount rate resolution from auction history
//!
//! COMPLIANCE:
//! - Fixed-point arithmetic only
//! - Validate before mutating; hard failures leave lists untouched
//! - Soft failures inside traversals are reported, never propagated

pub mod config;
pub mod error;
pub mod external;
pub mod instrument_list;
pub mod math;
pub mod offer_list;
pub mod rate_adapter;

pub use config::{CollateralParam, LedgerConfig};
pub use error::{
    InvalidReason, LedgerError, LedgerResult, OfferError, RateError, ValidationError,
};
pub use instrument_list::{InstrumentList, RedemptionOutcome, RedemptionReport};
pub use offer_list::{OfferState, PendingOffer, PendingOfferList, ReconcileOutcome, ReconcileReport};
pub use rate_adapter::{DiscountRateAdapter, DiscountRateSource};

use serde::{Deserialize, Serialize};

/// Duration aggregate over a list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeData {
    /// Sum of remaining seconds times normalized amount
    pub weighted_time_to_maturity: u128,
    /// Sum of normalized amounts
    pub cumulative_amount: u128,
    /// Whether the hypothetical target was found in the list
    pub found: bool,
}

impl CumulativeData {
    fn accumulate(&mut self, weighted: u128, amount: u128) -> LedgerResult<()> {
        self.weighted_time_to_maturity = self
            .weighted_time_to_maturity
            .checked_add(weighted)
            .ok_or(LedgerError::ArithmeticOverflow("cumulative weighted time"))?;
        self.cumulative_amount = self
            .cumulative_amount
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow("cumulative amount"))?;
        Ok(())
    }

    /// Amount-weighted average seconds to maturity
    pub fn average_time_to_maturity(&self) -> u128 {
        if self.cumulative_amount == 0 {
            0
        } else {
            self.weighted_time_to_maturity / self.cumulative_amount
        }
    }
}
