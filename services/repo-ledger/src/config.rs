//! Ledger configuration

use crate::external::AuctionOracle;
use crate::instrument_list::InstrumentList;
use crate::rate_adapter::DiscountRateAdapter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use services_common::{AssetId, CollateralId, DEFAULT_RATE_STALENESS_SECS, OperatorId};
use std::sync::Arc;

const ENV_CONFIG_PATH: &str = "REPO_LEDGER_CONFIG";
const ENV_BASE_ASSET: &str = "REPO_LEDGER_BASE_ASSET";
const ENV_PURCHASE_PRECISION: &str = "REPO_LEDGER_PURCHASE_PRECISION";
const ENV_RATE_STALENESS_SECS: &str = "REPO_LEDGER_RATE_STALENESS_SECS";
const ENV_OPERATORS: &str = "REPO_LEDGER_OPERATORS";

const DEFAULT_BASE_ASSET: u32 = 1;
const DEFAULT_PURCHASE_PRECISION: u128 = 1_000_000; // 6 decimals

/// Minimum maintenance ratio required of one collateral token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralParam {
    pub collateral: CollateralId,
    /// 18-decimal fixed point
    pub min_ratio: u128,
}

/// Repo ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Asset the strategy holds and buys instruments with
    pub base_asset: AssetId,
    /// `10^decimals` of the base asset
    pub purchase_precision: u128,
    /// Auction results younger than this are provisional
    pub rate_staleness_secs: u64,
    /// Callers allowed to invalidate rates
    pub operators: Vec<OperatorId>,
    /// Collateral acceptance thresholds
    pub collateral_params: Vec<CollateralParam>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_asset: AssetId::new(DEFAULT_BASE_ASSET),
            purchase_precision: DEFAULT_PURCHASE_PRECISION,
            rate_staleness_secs: DEFAULT_RATE_STALENESS_SECS,
            operators: Vec::new(),
            collateral_params: Vec::new(),
        }
    }
}

impl LedgerConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid ledger configuration JSON")
    }

    /// Load from `REPO_LEDGER_CONFIG` (if set) and `REPO_LEDGER_*` overrides
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(ENV_CONFIG_PATH) {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read ledger config {path}"))?;
                Self::from_json_str(&raw)?
            }
            None => Self::default(),
        };

        match lookup(ENV_BASE_ASSET) {
            Some(val) => {
                config.base_asset = AssetId::new(
                    val.parse()
                        .with_context(|| format!("Invalid {ENV_BASE_ASSET}: {val}"))?,
                );
            }
            None => tracing::warn!(
                "{} not set, using {}",
                ENV_BASE_ASSET,
                config.base_asset
            ),
        }

        if let Some(val) = lookup(ENV_PURCHASE_PRECISION) {
            config.purchase_precision = val
                .parse()
                .with_context(|| format!("Invalid {ENV_PURCHASE_PRECISION}: {val}"))?;
        }

        if let Some(val) = lookup(ENV_RATE_STALENESS_SECS) {
            config.rate_staleness_secs = val
                .parse()
                .with_context(|| format!("Invalid {ENV_RATE_STALENESS_SECS}: {val}"))?;
        }

        if let Some(val) = lookup(ENV_OPERATORS) {
            config.operators = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse()
                        .map(OperatorId::new)
                        .with_context(|| format!("Invalid operator id in {ENV_OPERATORS}: {s}"))
                })
                .collect::<Result<_>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the ledger cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.purchase_precision == 0 {
            anyhow::bail!("purchase_precision must be positive");
        }
        if self.rate_staleness_secs == 0 {
            tracing::warn!("rate_staleness_secs is 0, every auction result counts as final");
        }
        Ok(())
    }

    /// Build the rate adapter and an empty instrument list from this config
    pub fn build(&self, oracle: Arc<dyn AuctionOracle>) -> (DiscountRateAdapter, InstrumentList) {
        let mut adapter =
            DiscountRateAdapter::new(oracle).with_staleness_window(self.rate_staleness_secs);
        for operator in &self.operators {
            adapter.grant_operator(*operator);
        }

        let mut instruments = InstrumentList::new();
        for param in &self.collateral_params {
            instruments.set_collateral_param(param.collateral, param.min_ratio);
        }

        (adapter, instruments)
    }
}
