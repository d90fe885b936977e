//! Outstanding auction offers, grouped by owning auction
//!
//! The chain is kept sorted by auction identity ascending; offers of the
//! same auction keep their submission order. Position is fixed at first
//! insertion and never changes when an offer's amount is edited.

use crate::CumulativeData;
use crate::error::{LedgerError, LedgerResult, OfferError};
use crate::external::{Auction, OfferLocker, OfferOutcome, RepoInstrument};
use crate::instrument_list::InstrumentList;
use crate::math;
use crate::rate_adapter::DiscountRateSource;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use services_common::{AssetId, AuctionId, InstrumentId, OfferId, Timestamp};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a pending offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferState {
    Submitted,
    Filled,
    PartiallyFilled,
    Canceled,
    Removed,
}

impl From<&OfferOutcome> for OfferState {
    fn from(outcome: &OfferOutcome) -> Self {
        match outcome {
            OfferOutcome::Filled { .. } => Self::Filled,
            OfferOutcome::PartiallyFilled { .. } => Self::PartiallyFilled,
            OfferOutcome::Canceled => Self::Canceled,
        }
    }
}

/// Offer submitted to an auction and not yet reconciled
#[derive(Clone)]
pub struct PendingOffer {
    /// Instrument the offer bids for
    pub instrument: Arc<dyn RepoInstrument>,
    /// Purchase-asset amount locked behind the offer
    pub amount: u128,
    /// Auction the offer was submitted to
    pub auction: Arc<dyn Auction>,
    /// Holder of the canonical offer record
    pub offer_locker: Arc<dyn OfferLocker>,
}

impl PendingOffer {
    pub fn auction_id(&self) -> AuctionId {
        self.auction.id()
    }

    pub fn instrument_id(&self) -> InstrumentId {
        self.instrument.id()
    }
}

impl fmt::Debug for PendingOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOffer")
            .field("instrument", &self.instrument.id())
            .field("amount", &self.amount)
            .field("auction", &self.auction.id())
            .finish()
    }
}

/// Reconciliation result for one completed offer
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Auction credit listed (or its rate refreshed) in the instrument list
    Credited {
        offer: OfferId,
        state: OfferState,
        instrument: InstrumentId,
        rate: u128,
        maturity: Timestamp,
    },
    /// Auction credit could not be listed; recovery is up to the caller
    CreditSkipped {
        offer: OfferId,
        state: OfferState,
        instrument: InstrumentId,
        error: LedgerError,
    },
    /// Nothing was credited
    Closed { offer: OfferId },
}

impl ReconcileOutcome {
    pub fn offer(&self) -> OfferId {
        match self {
            Self::Credited { offer, .. }
            | Self::CreditSkipped { offer, .. }
            | Self::Closed { offer } => *offer,
        }
    }
}

/// Summary of a `remove_completed` pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub outcomes: Vec<ReconcileOutcome>,
}

impl ReconcileReport {
    pub fn removed(&self) -> usize {
        self.outcomes.len()
    }

    /// Offers whose instrument credit failed to list
    pub fn skipped(&self) -> Vec<OfferId> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::CreditSkipped { .. }))
            .map(ReconcileOutcome::offer)
            .collect()
    }
}

/// Arena node
struct OfferNode {
    offer: PendingOffer,
    next: Option<OfferId>,
}

/// Sorted list of pending offers
#[derive(Default)]
pub struct PendingOfferList {
    head: Option<OfferId>,
    nodes: FxHashMap<OfferId, OfferNode>,
}

impl PendingOfferList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_offers(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn offer_in_list(&self, offer: OfferId) -> bool {
        self.nodes.contains_key(&offer)
    }

    pub fn get_offer(&self, offer: OfferId) -> Option<&PendingOffer> {
        self.nodes.get(&offer).map(|node| &node.offer)
    }

    fn chain(&self) -> impl Iterator<Item = (OfferId, &OfferNode)> + '_ {
        std::iter::successors(
            self.head
                .and_then(|id| self.nodes.get(&id).map(|node| (id, node))),
            move |(_, node)| {
                node.next
                    .and_then(|id| self.nodes.get(&id).map(|next| (id, next)))
            },
        )
    }

    /// Offer ids in chain order
    pub fn pending_offers(&self) -> Vec<OfferId> {
        self.chain().map(|(id, _)| id).collect()
    }

    /// Track a new offer or update the amount of a tracked one
    ///
    /// The amount must be positive and match the offer locker's record.
    /// A tracked offer keeps its position; a new one goes after every offer
    /// of an auction with the same or lower identity.
    pub fn insert_pending(&mut self, offer_id: OfferId, offer: PendingOffer) -> LedgerResult<()> {
        if offer.amount == 0 {
            return Err(OfferError::ZeroAmount(offer_id).into());
        }
        let locked = offer.offer_locker.locked_offer(offer_id)?;
        if locked.amount != offer.amount {
            return Err(OfferError::AmountMismatch {
                offer: offer_id,
                stored: offer.amount,
                locked: locked.amount,
            }
            .into());
        }

        let auction_id = offer.auction_id();

        if let Some(node) = self.nodes.get_mut(&offer_id) {
            let existing = node.offer.auction_id();
            if existing != auction_id {
                return Err(OfferError::AuctionChanged {
                    offer: offer_id,
                    existing,
                    requested: auction_id,
                }
                .into());
            }
            debug!(
                "Updated {} amount from {} to {}",
                offer_id, node.offer.amount, offer.amount
            );
            node.offer = offer;
            return Ok(());
        }

        if offer.auction.completed()? {
            return Err(OfferError::AuctionCompleted {
                offer: offer_id,
                auction: auction_id,
            }
            .into());
        }

        let mut prev: Option<OfferId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            if node.offer.auction_id() > auction_id {
                break;
            }
            prev = Some(current);
            cursor = node.next;
        }

        info!(
            "Tracking {} in {} for {} amount {}",
            offer_id,
            auction_id,
            offer.instrument_id(),
            offer.amount
        );
        self.nodes.insert(offer_id, OfferNode { offer, next: cursor });
        match prev {
            Some(prev_id) => {
                if let Some(prev_node) = self.nodes.get_mut(&prev_id) {
                    prev_node.next = Some(offer_id);
                }
            }
            None => self.head = Some(offer_id),
        }
        Ok(())
    }

    /// Drop offers whose auction has completed, listing any instrument credit
    ///
    /// Auction statuses and outcomes are read for the whole chain before the
    /// first unlink, so a failing read leaves both lists untouched. A failed
    /// listing is recorded and the offer is removed regardless.
    pub fn remove_completed(
        &mut self,
        instruments: &mut InstrumentList,
        rates: &dyn DiscountRateSource,
        base_asset: AssetId,
        now: Timestamp,
    ) -> LedgerResult<ReconcileReport> {
        let mut completed: FxHashMap<OfferId, OfferOutcome> = FxHashMap::default();
        for (id, node) in self.chain() {
            let auction = &node.offer.auction;
            if auction.completed()? {
                completed.insert(id, auction.offer_outcome(id)?);
            }
        }

        let mut report = ReconcileReport::default();
        if completed.is_empty() {
            return Ok(report);
        }

        let mut prev: Option<OfferId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let next = self.nodes.get(&current).and_then(|node| node.next);

            let Some(outcome) = completed.remove(&current) else {
                prev = Some(current);
                cursor = next;
                continue;
            };

            let state = OfferState::from(&outcome);
            let result = match outcome.accepted_instrument() {
                Some(instrument) => {
                    let instrument_id = instrument.id();
                    match instruments.validate_and_insert(
                        Arc::clone(instrument),
                        rates,
                        base_asset,
                        now,
                    ) {
                        Ok((rate, maturity)) => ReconcileOutcome::Credited {
                            offer: current,
                            state,
                            instrument: instrument_id,
                            rate,
                            maturity,
                        },
                        Err(error) => {
                            warn!(
                                "Could not list {} from {}: {}",
                                instrument_id, current, error
                            );
                            ReconcileOutcome::CreditSkipped {
                                offer: current,
                                state,
                                instrument: instrument_id,
                                error,
                            }
                        }
                    }
                }
                None => ReconcileOutcome::Closed { offer: current },
            };

            match prev {
                Some(prev_id) => {
                    if let Some(prev_node) = self.nodes.get_mut(&prev_id) {
                        prev_node.next = next;
                    }
                }
                None => self.head = next,
            }
            self.nodes.remove(&current);
            info!("Removed {} ({:?})", current, state);

            report.outcomes.push(result);
            cursor = next;
        }

        Ok(report)
    }

    /// Value of outstanding offers, optionally restricted to one instrument
    ///
    /// Open offers count at their locked amount. Offers of completed
    /// auctions count at the discounted value of their credit unless that
    /// instrument is already held, in which case the holding covers it.
    pub fn get_present_value(
        &self,
        instruments: &InstrumentList,
        rates: &dyn DiscountRateSource,
        precision: u128,
        filter: Option<InstrumentId>,
        now: Timestamp,
    ) -> LedgerResult<u128> {
        let mut total = 0u128;

        for (id, node) in self.chain() {
            let offer = &node.offer;
            if filter.is_some_and(|wanted| wanted != offer.instrument_id()) {
                continue;
            }

            let value = match exposure(id, offer, instruments)? {
                Exposure::Open => offer.amount,
                Exposure::Credit {
                    instrument,
                    repo_amount,
                } => {
                    let normalized = normalized_credit(instrument.as_ref(), repo_amount, precision)?;
                    let maturity = instrument.config()?.maturity;
                    let rate = rates.discount_rate(instrument.as_ref(), now)?;
                    math::present_value(normalized, precision, maturity, rate, now)?
                }
                Exposure::Settled => continue,
            };

            total = total
                .checked_add(value)
                .ok_or(LedgerError::ArithmeticOverflow("offer present value"))?;
        }

        Ok(total)
    }

    /// Weighted time to maturity and total amount of outstanding offers
    ///
    /// Counts the same positions as `get_present_value`: open offers at
    /// their amount, unheld auction credits at their normalized repo amount.
    /// `target` adds a hypothetical amount to offers on one instrument.
    pub fn get_cumulative_offer_data(
        &self,
        instruments: &InstrumentList,
        target: Option<(InstrumentId, u128)>,
        precision: u128,
        now: Timestamp,
    ) -> LedgerResult<CumulativeData> {
        let mut data = CumulativeData::default();

        for (id, node) in self.chain() {
            let offer = &node.offer;
            let (instrument, mut amount) = match exposure(id, offer, instruments)? {
                Exposure::Open => (Arc::clone(&offer.instrument), offer.amount),
                Exposure::Credit {
                    instrument,
                    repo_amount,
                } => {
                    let normalized = normalized_credit(instrument.as_ref(), repo_amount, precision)?;
                    (instrument, normalized)
                }
                Exposure::Settled => continue,
            };

            if let Some((target_id, extra)) = target {
                if target_id == instrument.id() {
                    amount = amount
                        .checked_add(extra)
                        .ok_or(LedgerError::ArithmeticOverflow("hypothetical offer"))?;
                    data.found = true;
                }
            }

            let maturity = instrument.config()?.maturity;
            data.accumulate(
                math::weighted_time_to_maturity(maturity, amount, now)?,
                amount,
            )?;
        }

        Ok(data)
    }
}

impl fmt::Debug for PendingOfferList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOfferList")
            .field("offers", &self.pending_offers())
            .finish()
    }
}

/// What a listed offer currently stands for
enum Exposure {
    /// Auction still open; the locked amount is at stake
    Open,
    /// Auction completed with a credit the instrument list does not hold yet
    Credit {
        instrument: Arc<dyn RepoInstrument>,
        repo_amount: u128,
    },
    /// Canceled, empty, or already covered by a holding
    Settled,
}

fn exposure(
    id: OfferId,
    offer: &PendingOffer,
    instruments: &InstrumentList,
) -> LedgerResult<Exposure> {
    if !offer.auction.completed()? {
        return Ok(Exposure::Open);
    }
    let outcome = offer.auction.offer_outcome(id)?;
    let repo_amount = outcome.repo_amount();
    match outcome.accepted_instrument() {
        Some(instrument) if repo_amount > 0 && !instruments.contains(instrument.id()) => {
            Ok(Exposure::Credit {
                instrument: Arc::clone(instrument),
                repo_amount,
            })
        }
        _ => Ok(Exposure::Settled),
    }
}

/// Repo token credit in purchase-asset units at `precision`
fn normalized_credit(
    instrument: &dyn RepoInstrument,
    repo_amount: u128,
    precision: u128,
) -> LedgerResult<u128> {
    math::normalize(
        repo_amount,
        instrument.redemption_value()?,
        instrument.decimals()?,
        precision,
    )
}
