//! Discount rate resolution from auction history
//!
//! The most recent clearing rate of a term is used unless it is younger
//! than the staleness window and the term has been auctioned before, in
//! which case the result is provisional and the nearest earlier auction
//! whose rate has not been invalidated is used instead.

use crate::error::{LedgerError, LedgerResult, RateError};
use crate::external::{AuctionOracle, RepoInstrument};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use services_common::{AuctionId, DEFAULT_RATE_STALENESS_SECS, InstrumentId, OperatorId, Timestamp};
use std::sync::Arc;
use tracing::{debug, info};

/// Anything that can price an instrument's discount rate
pub trait DiscountRateSource {
    /// Annualized discount rate, 18-decimal fixed point
    fn discount_rate(&self, instrument: &dyn RepoInstrument, now: Timestamp) -> LedgerResult<u128>;
}

/// Resolves discount rates from the auction-results oracle
pub struct DiscountRateAdapter {
    /// Auction history source
    oracle: Arc<dyn AuctionOracle>,
    /// Results younger than this many seconds are provisional
    staleness_window: u64,
    /// Callers allowed to invalidate rates
    operators: FxHashSet<OperatorId>,
    /// Invalidated (instrument, auction) rates
    invalid_rates: RwLock<FxHashMap<InstrumentId, FxHashSet<AuctionId>>>,
}

impl DiscountRateAdapter {
    /// Create adapter with the default 30 minute staleness window
    pub fn new(oracle: Arc<dyn AuctionOracle>) -> Self {
        Self {
            oracle,
            staleness_window: DEFAULT_RATE_STALENESS_SECS,
            operators: FxHashSet::default(),
            invalid_rates: RwLock::new(FxHashMap::default()),
        }
    }

    /// Override the staleness window
    #[must_use]
    pub fn with_staleness_window(mut self, secs: u64) -> Self {
        self.staleness_window = secs;
        self
    }

    pub fn staleness_window(&self) -> u64 {
        self.staleness_window
    }

    /// Authorize a caller for rate invalidation
    pub fn grant_operator(&mut self, operator: OperatorId) {
        if self.operators.insert(operator) {
            info!("Granted rate operator role to {}", operator);
        }
    }

    /// Revoke a caller's rate invalidation role
    pub fn revoke_operator(&mut self, operator: OperatorId) {
        if self.operators.remove(&operator) {
            info!("Revoked rate operator role from {}", operator);
        }
    }

    pub fn is_operator(&self, operator: OperatorId) -> bool {
        self.operators.contains(&operator)
    }

    /// Whether the rate of `auction` has been invalidated for `instrument`
    pub fn is_rate_invalid(&self, instrument: InstrumentId, auction: AuctionId) -> bool {
        self.invalid_rates
            .read()
            .get(&instrument)
            .is_some_and(|auctions| auctions.contains(&auction))
    }

    /// Flag an auction's clearing rate as unusable for an instrument
    ///
    /// Idempotent; only authorized operators may call it.
    pub fn mark_rate_invalid(
        &self,
        caller: OperatorId,
        instrument: InstrumentId,
        auction: AuctionId,
    ) -> LedgerResult<()> {
        if !self.is_operator(caller) {
            return Err(LedgerError::Unauthorized(caller));
        }
        let newly_marked = self
            .invalid_rates
            .write()
            .entry(instrument)
            .or_default()
            .insert(auction);
        if newly_marked {
            info!(
                "Rate of {} marked invalid for {} by {}",
                auction, instrument, caller
            );
        }
        Ok(())
    }

    /// Resolve the discount rate for an instrument
    pub fn get_discount_rate(
        &self,
        instrument: &dyn RepoInstrument,
        now: Timestamp,
    ) -> LedgerResult<u128> {
        let family = instrument.family();
        let id = instrument.id();
        let results = self.oracle.auction_results(family)?;

        let Some(latest) = results.last() else {
            return Err(RateError::NoAuctions(family).into());
        };

        if results.len() > 1 && now.secs_since(latest.clearing_time) < self.staleness_window {
            debug!(
                "Latest auction {} for {} is provisional, searching earlier results",
                latest.auction_id, family
            );
            return results[..results.len() - 1]
                .iter()
                .rev()
                .find(|result| !self.is_rate_invalid(id, result.auction_id))
                .map(|result| result.clearing_rate)
                .ok_or_else(|| RateError::NoValidRate(family).into());
        }

        if self.is_rate_invalid(id, latest.auction_id) {
            return Err(RateError::InvalidRate {
                instrument: id,
                auction: latest.auction_id,
            }
            .into());
        }
        Ok(latest.clearing_rate)
    }
}

impl DiscountRateSource for DiscountRateAdapter {
    fn discount_rate(&self, instrument: &dyn RepoInstrument, now: Timestamp) -> LedgerResult<u128> {
        self.get_discount_rate(instrument, now)
    }
}
