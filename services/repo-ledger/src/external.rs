//! Interfaces of the external services the ledger consumes
//!
//! Every collaborator is untrusted: any call may fail or return
//! adversarial data. Implementations live outside this crate.

use serde::{Deserialize, Serialize};
use services_common::{
    AssetId, AuctionId, CollateralId, FamilyId, InstrumentId, OfferId, ServiceError, Timestamp,
};
use std::fmt;
use std::sync::Arc;

/// Result of a call into an external service
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Static configuration of a repo token
#[derive(Clone)]
pub struct InstrumentConfig {
    /// Redemption timestamp
    pub maturity: Timestamp,
    /// Asset the instrument is bought and redeemed with
    pub purchase_asset: AssetId,
    /// Servicer that redeems matured balances
    pub servicer: Arc<dyn Servicer>,
    /// Manager of the collateral backing the term
    pub collateral_manager: Arc<dyn CollateralManager>,
}

impl fmt::Debug for InstrumentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentConfig")
            .field("maturity", &self.maturity)
            .field("purchase_asset", &self.purchase_asset)
            .field("servicer", &"Arc<dyn Servicer>")
            .field("collateral_manager", &"Arc<dyn CollateralManager>")
            .finish()
    }
}

/// A repo token held (or about to be held) by the strategy
pub trait RepoInstrument: Send + Sync {
    /// Unique identifier
    fn id(&self) -> InstrumentId;

    /// Term the instrument belongs to; auction history is keyed by it
    fn family(&self) -> FamilyId;

    fn config(&self) -> ServiceResult<InstrumentConfig>;

    /// Balance held by the strategy, in the instrument's native precision
    fn balance(&self) -> ServiceResult<u128>;

    /// Redemption value per token, 18-decimal fixed point
    fn redemption_value(&self) -> ServiceResult<u128>;

    fn decimals(&self) -> ServiceResult<u8>;
}

/// Redeems matured repo tokens for the purchase asset
pub trait Servicer: Send + Sync {
    /// Burn `amount` of the strategy's tokens for the purchase asset
    fn redeem(&self, amount: u128) -> ServiceResult<()>;
}

/// Collateral configuration of a term
pub trait CollateralManager: Send + Sync {
    fn num_accepted_collateral_tokens(&self) -> ServiceResult<usize>;

    fn collateral_token(&self, index: usize) -> ServiceResult<CollateralId>;

    /// Current maintenance ratio, 18-decimal fixed point
    fn maintenance_ratio(&self, token: CollateralId) -> ServiceResult<u128>;
}

/// One cleared auction of a term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionResult {
    pub auction_id: AuctionId,
    /// Annualized clearing rate, 18-decimal fixed point
    pub clearing_rate: u128,
    pub clearing_time: Timestamp,
}

/// Source of auction history
pub trait AuctionOracle: Send + Sync {
    /// Cleared auctions for a term, oldest first
    fn auction_results(&self, family: FamilyId) -> ServiceResult<Vec<AuctionResult>>;
}

/// Final disposition of one offer in a completed auction
#[derive(Clone)]
pub enum OfferOutcome {
    /// Offer fully accepted
    Filled {
        instrument: Arc<dyn RepoInstrument>,
        /// Repo tokens credited to the strategy
        repo_amount: u128,
    },
    /// Offer partially accepted; the remainder was refunded
    PartiallyFilled {
        instrument: Arc<dyn RepoInstrument>,
        repo_amount: u128,
        refunded: u128,
    },
    /// Offer rejected in full
    Canceled,
}

impl OfferOutcome {
    /// Instrument credited by the auction, if any
    #[must_use]
    pub fn accepted_instrument(&self) -> Option<&Arc<dyn RepoInstrument>> {
        match self {
            Self::Filled { instrument, .. } | Self::PartiallyFilled { instrument, .. } => {
                Some(instrument)
            }
            Self::Canceled => None,
        }
    }

    /// Repo tokens credited by the auction
    #[must_use]
    pub const fn repo_amount(&self) -> u128 {
        match self {
            Self::Filled { repo_amount, .. } | Self::PartiallyFilled { repo_amount, .. } => {
                *repo_amount
            }
            Self::Canceled => 0,
        }
    }
}

impl fmt::Debug for OfferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filled {
                instrument,
                repo_amount,
            } => f
                .debug_struct("Filled")
                .field("instrument", &instrument.id())
                .field("repo_amount", repo_amount)
                .finish(),
            Self::PartiallyFilled {
                instrument,
                repo_amount,
                refunded,
            } => f
                .debug_struct("PartiallyFilled")
                .field("instrument", &instrument.id())
                .field("repo_amount", repo_amount)
                .field("refunded", refunded)
                .finish(),
            Self::Canceled => f.write_str("Canceled"),
        }
    }
}

/// Auction that owns pending offers
pub trait Auction: Send + Sync {
    /// Identity used to order offers
    fn id(&self) -> AuctionId;

    fn completed(&self) -> ServiceResult<bool>;

    /// Outcome for one offer; only meaningful once completed
    fn offer_outcome(&self, offer: OfferId) -> ServiceResult<OfferOutcome>;
}

/// Canonical record of a submitted offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockedOffer {
    pub amount: u128,
}

/// Holds the purchase asset locked behind submitted offers
pub trait OfferLocker: Send + Sync {
    fn locked_offer(&self, offer: OfferId) -> ServiceResult<LockedOffer>;
}
