//! Error taxonomy for the repo ledger
//!
//! Hard failures (validation, rate resolution, status reads) abort the
//! enclosing operation before any list mutation. Soft failures inside a
//! traversal never surface here; they are recorded in pass reports.

use services_common::{
    AssetId, AuctionId, CollateralId, FamilyId, InstrumentId, OfferId, OperatorId, ServiceError,
    Timestamp,
};
use std::fmt;
use thiserror::Error;

/// Why an instrument was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Instrument is bought with a different asset than the strategy holds
    WrongPurchaseAsset { expected: AssetId, actual: AssetId },
    /// Instrument has already reached maturity
    Matured { maturity: Timestamp, now: Timestamp },
    /// Accepted collateral has no configured minimum ratio
    MissingCollateralParam(CollateralId),
    /// Accepted collateral's maintenance ratio is below the configured minimum
    CollateralRatioTooLow {
        collateral: CollateralId,
        ratio: u128,
        minimum: u128,
    },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongPurchaseAsset { expected, actual } => {
                write!(f, "purchase asset {actual} does not match {expected}")
            }
            Self::Matured { maturity, now } => write!(f, "matured at {maturity} (now {now})"),
            Self::MissingCollateralParam(collateral) => {
                write!(f, "no minimum ratio configured for {collateral}")
            }
            Self::CollateralRatioTooLow {
                collateral,
                ratio,
                minimum,
            } => write!(
                f,
                "maintenance ratio {ratio} for {collateral} below minimum {minimum}"
            ),
        }
    }
}

/// Instrument validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid instrument {instrument}: {reason}")]
    InvalidInstrument {
        instrument: InstrumentId,
        reason: InvalidReason,
    },
}

/// Discount rate resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    #[error("No auctions found for {0}")]
    NoAuctions(FamilyId),

    #[error("No valid rate among prior auctions for {0}")]
    NoValidRate(FamilyId),

    #[error("Most recent auction {auction} rate is invalid for {instrument}")]
    InvalidRate {
        instrument: InstrumentId,
        auction: AuctionId,
    },
}

/// Pending offer bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfferError {
    #[error("Offer {0} has zero amount")]
    ZeroAmount(OfferId),

    #[error("Offer {offer} amount {stored} does not match locked amount {locked}")]
    AmountMismatch {
        offer: OfferId,
        stored: u128,
        locked: u128,
    },

    #[error("Offer {offer} cannot move from {existing} to {requested}")]
    AuctionChanged {
        offer: OfferId,
        existing: AuctionId,
        requested: AuctionId,
    },

    #[error("Auction {auction} for offer {offer} has already completed")]
    AuctionCompleted { offer: OfferId, auction: AuctionId },
}

/// Top-level ledger error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Rate(#[from] RateError),

    #[error(transparent)]
    Offer(#[from] OfferError),

    #[error("External call failed: {0}")]
    External(#[from] ServiceError),

    #[error("Caller {0} is not authorized")]
    Unauthorized(OperatorId),

    #[error("Arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),
}

impl LedgerError {
    /// Shorthand for an instrument validation failure
    pub(crate) const fn invalid(instrument: InstrumentId, reason: InvalidReason) -> Self {
        Self::Validation(ValidationError::InvalidInstrument { instrument, reason })
    }

    /// Whether the failure came from an external collaborator
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

/// Result alias used by every fallible ledger operation
pub type LedgerResult<T> = Result<T, LedgerError>;
