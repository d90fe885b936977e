//! Maturity-sorted list of held repo tokens
//!
//! Nodes live in an arena keyed by instrument id with an explicit head
//! key. The chain is ordered by maturity ascending, so matured holdings
//! always form a prefix of it.

use crate::CumulativeData;
use crate::error::{InvalidReason, LedgerError, LedgerResult};
use crate::external::{InstrumentConfig, RepoInstrument, Servicer};
use crate::math;
use crate::rate_adapter::DiscountRateSource;
use rustc_hash::FxHashMap;
use services_common::{AssetId, CollateralId, InstrumentId, ServiceError, Timestamp};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Arena node
struct InstrumentNode {
    instrument: Arc<dyn RepoInstrument>,
    maturity: Timestamp,
    next: Option<InstrumentId>,
}

/// Result of one redemption attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// Balance redeemed and node removed
    Redeemed {
        instrument: InstrumentId,
        amount: u128,
    },
    /// Nothing left to redeem; node removed
    Emptied { instrument: InstrumentId },
    /// Servicer refused; node kept for a later pass
    RetryLater {
        instrument: InstrumentId,
        error: ServiceError,
    },
}

/// Summary of a `remove_and_redeem_matured` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedemptionReport {
    pub outcomes: Vec<RedemptionOutcome>,
}

impl RedemptionReport {
    /// Number of nodes unlinked during the pass
    pub fn removed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o, RedemptionOutcome::RetryLater { .. }))
            .count()
    }

    /// Instruments left in place for retry
    pub fn retained(&self) -> Vec<InstrumentId> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                RedemptionOutcome::RetryLater { instrument, .. } => Some(*instrument),
                _ => None,
            })
            .collect()
    }
}

/// Matured node staged for redemption
struct MaturedHolding {
    id: InstrumentId,
    balance: u128,
    servicer: Arc<dyn Servicer>,
}

/// Sorted list of repo token holdings
#[derive(Default)]
pub struct InstrumentList {
    head: Option<InstrumentId>,
    nodes: FxHashMap<InstrumentId, InstrumentNode>,
    /// Present iff the instrument is listed
    discount_rates: FxHashMap<InstrumentId, u128>,
    /// Minimum maintenance ratio per accepted collateral
    collateral_params: FxHashMap<CollateralId, u128>,
}

impl InstrumentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the minimum maintenance ratio required of a collateral
    pub fn set_collateral_param(&mut self, collateral: CollateralId, min_ratio: u128) {
        info!("Collateral {} minimum ratio set to {}", collateral, min_ratio);
        self.collateral_params.insert(collateral, min_ratio);
    }

    pub fn collateral_param(&self, collateral: CollateralId) -> Option<u128> {
        self.collateral_params.get(&collateral).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn contains(&self, instrument: InstrumentId) -> bool {
        self.nodes.contains_key(&instrument)
    }

    /// Stored discount rate, 0 when the instrument is not tracked
    pub fn discount_rate(&self, instrument: InstrumentId) -> u128 {
        self.discount_rates.get(&instrument).copied().unwrap_or(0)
    }

    pub fn maturity(&self, instrument: InstrumentId) -> Option<Timestamp> {
        self.nodes.get(&instrument).map(|node| node.maturity)
    }

    pub fn get(&self, instrument: InstrumentId) -> Option<Arc<dyn RepoInstrument>> {
        self.nodes
            .get(&instrument)
            .map(|node| Arc::clone(&node.instrument))
    }

    fn next_of(&self, instrument: InstrumentId) -> Option<InstrumentId> {
        self.nodes.get(&instrument).and_then(|node| node.next)
    }

    /// Walk the chain head to tail
    fn chain(&self) -> impl Iterator<Item = (InstrumentId, &InstrumentNode)> + '_ {
        std::iter::successors(
            self.head
                .and_then(|id| self.nodes.get(&id).map(|node| (id, node))),
            move |(_, node)| {
                node.next
                    .and_then(|id| self.nodes.get(&id).map(|next| (id, next)))
            },
        )
    }

    /// Held instruments in maturity order
    pub fn holdings(&self) -> Vec<InstrumentId> {
        self.chain().map(|(id, _)| id).collect()
    }

    /// Weighted time to maturity and total normalized balance of the holdings
    ///
    /// `target` adds a hypothetical amount to one instrument's balance so a
    /// purchase can be evaluated before it is made.
    pub fn get_cumulative_data(
        &self,
        target: Option<(InstrumentId, u128)>,
        precision: u128,
        now: Timestamp,
    ) -> LedgerResult<CumulativeData> {
        let mut data = CumulativeData::default();

        for (id, node) in self.chain() {
            let mut balance = node.instrument.balance()?;
            if let Some((target_id, amount)) = target {
                if target_id == id {
                    balance = balance
                        .checked_add(amount)
                        .ok_or(LedgerError::ArithmeticOverflow("hypothetical balance"))?;
                    data.found = true;
                }
            }
            if balance == 0 {
                continue;
            }

            let normalized = normalized_balance(node.instrument.as_ref(), balance, precision)?;
            data.accumulate(
                math::weighted_time_to_maturity(node.maturity, normalized, now)?,
                normalized,
            )?;
        }

        Ok(data)
    }

    /// Present value of the holdings, or of one holding when `filter` is set
    ///
    /// Unmatured holdings are discounted at the live rate from `rates`; a
    /// rate failure aborts the valuation. Matured holdings count at par.
    pub fn get_present_value(
        &self,
        rates: &dyn DiscountRateSource,
        precision: u128,
        filter: Option<InstrumentId>,
        now: Timestamp,
    ) -> LedgerResult<u128> {
        let mut total = 0u128;

        for (id, node) in self.chain() {
            if filter.is_some_and(|wanted| wanted != id) {
                continue;
            }

            let balance = node.instrument.balance()?;
            if balance > 0 {
                let normalized = normalized_balance(node.instrument.as_ref(), balance, precision)?;
                let value = if math::has_matured(node.maturity, now) {
                    normalized
                } else {
                    let rate = rates.discount_rate(node.instrument.as_ref(), now)?;
                    math::present_value(normalized, precision, node.maturity, rate, now)?
                };
                total = total
                    .checked_add(value)
                    .ok_or(LedgerError::ArithmeticOverflow("present value total"))?;
            }

            if filter.is_some() {
                break;
            }
        }

        Ok(total)
    }

    /// Present value of one holding at the rate stored when it was listed
    ///
    /// Matured holdings count at par; unlisted instruments are worth 0.
    pub fn holding_value(
        &self,
        instrument: InstrumentId,
        precision: u128,
        now: Timestamp,
    ) -> LedgerResult<u128> {
        let Some(node) = self.nodes.get(&instrument) else {
            return Ok(0);
        };
        let balance = node.instrument.balance()?;
        if balance == 0 {
            return Ok(0);
        }
        let normalized = normalized_balance(node.instrument.as_ref(), balance, precision)?;
        math::present_value(
            normalized,
            precision,
            node.maturity,
            self.discount_rate(instrument),
            now,
        )
    }

    /// Redeem matured holdings and unlink them
    ///
    /// Balances and servicers of every matured node are read before the
    /// first redemption, so a failing read leaves the list untouched. A
    /// refused redemption keeps the node for a later pass.
    pub fn remove_and_redeem_matured(&mut self, now: Timestamp) -> LedgerResult<RedemptionReport> {
        let mut staged = Vec::new();
        for (id, node) in self.chain() {
            if !math::has_matured(node.maturity, now) {
                break;
            }
            let balance = node.instrument.balance()?;
            let servicer = node.instrument.config()?.servicer;
            staged.push(MaturedHolding {
                id,
                balance,
                servicer,
            });
        }

        let mut report = RedemptionReport::default();
        let mut prev: Option<InstrumentId> = None;

        // Matured nodes are a prefix of the chain, visited in order
        for holding in staged {
            let outcome = if holding.balance == 0 {
                RedemptionOutcome::Emptied {
                    instrument: holding.id,
                }
            } else {
                match holding.servicer.redeem(holding.balance) {
                    Ok(()) => RedemptionOutcome::Redeemed {
                        instrument: holding.id,
                        amount: holding.balance,
                    },
                    Err(error) => {
                        warn!("Redemption of {} failed, retrying later: {}", holding.id, error);
                        RedemptionOutcome::RetryLater {
                            instrument: holding.id,
                            error,
                        }
                    }
                }
            };

            if matches!(outcome, RedemptionOutcome::RetryLater { .. }) {
                prev = Some(holding.id);
            } else {
                self.unlink(prev, holding.id);
                info!("Removed matured {}", holding.id);
            }
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Check an instrument against the strategy's acceptance rules
    pub fn validate_instrument(
        &self,
        instrument: &dyn RepoInstrument,
        base_asset: AssetId,
        now: Timestamp,
    ) -> LedgerResult<InstrumentConfig> {
        let id = instrument.id();
        let config = instrument.config()?;

        if config.purchase_asset != base_asset {
            return Err(LedgerError::invalid(
                id,
                InvalidReason::WrongPurchaseAsset {
                    expected: base_asset,
                    actual: config.purchase_asset,
                },
            ));
        }
        if math::has_matured(config.maturity, now) {
            return Err(LedgerError::invalid(
                id,
                InvalidReason::Matured {
                    maturity: config.maturity,
                    now,
                },
            ));
        }

        let manager = &config.collateral_manager;
        for index in 0..manager.num_accepted_collateral_tokens()? {
            let collateral = manager.collateral_token(index)?;
            let Some(minimum) = self.collateral_param(collateral) else {
                return Err(LedgerError::invalid(
                    id,
                    InvalidReason::MissingCollateralParam(collateral),
                ));
            };
            let ratio = manager.maintenance_ratio(collateral)?;
            if ratio < minimum {
                return Err(LedgerError::invalid(
                    id,
                    InvalidReason::CollateralRatioTooLow {
                        collateral,
                        ratio,
                        minimum,
                    },
                ));
            }
        }

        Ok(config)
    }

    /// Validate and list an instrument, or refresh the rate of a listed one
    ///
    /// Returns the effective discount rate and the maturity.
    pub fn validate_and_insert(
        &mut self,
        instrument: Arc<dyn RepoInstrument>,
        rates: &dyn DiscountRateSource,
        base_asset: AssetId,
        now: Timestamp,
    ) -> LedgerResult<(u128, Timestamp)> {
        let id = instrument.id();

        if let Some(maturity) = self.tracked_maturity(id) {
            if math::has_matured(maturity, now) {
                return Err(LedgerError::invalid(
                    id,
                    InvalidReason::Matured { maturity, now },
                ));
            }
            let stored = self.discount_rate(id);
            let fresh = rates.discount_rate(instrument.as_ref(), now)?;
            if fresh != 0 && fresh != stored {
                debug!("Refreshing rate of {} from {} to {}", id, stored, fresh);
                self.discount_rates.insert(id, fresh);
                return Ok((fresh, maturity));
            }
            return Ok((stored, maturity));
        }

        let rate = rates.discount_rate(instrument.as_ref(), now)?;
        let config = self.validate_instrument(instrument.as_ref(), base_asset, now)?;
        self.insert_sorted(instrument, config.maturity);
        self.discount_rates.insert(id, rate);
        info!("Listed {} maturing {} at rate {}", id, config.maturity, rate);

        Ok((rate, config.maturity))
    }

    /// Maturity of a listed instrument that carries a nonzero rate
    fn tracked_maturity(&self, instrument: InstrumentId) -> Option<Timestamp> {
        match self.discount_rates.get(&instrument) {
            Some(&rate) if rate != 0 => self.maturity(instrument),
            _ => None,
        }
    }

    /// Splice before the first node maturing no earlier; append otherwise
    ///
    /// Returns false when the instrument is already listed.
    fn insert_sorted(&mut self, instrument: Arc<dyn RepoInstrument>, maturity: Timestamp) -> bool {
        let id = instrument.id();
        if self.nodes.contains_key(&id) {
            return false;
        }

        let mut prev: Option<InstrumentId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            if node.maturity >= maturity {
                break;
            }
            prev = Some(current);
            cursor = node.next;
        }

        self.nodes.insert(
            id,
            InstrumentNode {
                instrument,
                maturity,
                next: cursor,
            },
        );
        match prev {
            Some(prev_id) => {
                if let Some(prev_node) = self.nodes.get_mut(&prev_id) {
                    prev_node.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        true
    }

    /// Unlink `id`, patching the head or the predecessor's next pointer
    fn unlink(&mut self, prev: Option<InstrumentId>, id: InstrumentId) {
        let next = self.next_of(id);
        match prev {
            Some(prev_id) => {
                if let Some(prev_node) = self.nodes.get_mut(&prev_id) {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        self.nodes.remove(&id);
        self.discount_rates.remove(&id);
    }
}

impl fmt::Debug for InstrumentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentList")
            .field("holdings", &self.holdings())
            .field("discount_rates", &self.discount_rates)
            .field("collateral_params", &self.collateral_params)
            .finish()
    }
}

/// Balance in purchase-asset units at `precision`
fn normalized_balance(
    instrument: &dyn RepoInstrument,
    balance: u128,
    precision: u128,
) -> LedgerResult<u128> {
    math::normalize(
        balance,
        instrument.redemption_value()?,
        instrument.decimals()?,
        precision,
    )
}
