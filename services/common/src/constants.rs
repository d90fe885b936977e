//! Common constants used across the ledger services
//!
//! COMPLIANCE: Single source of truth for all magic numbers

/// Fixed-point arithmetic constants
pub mod fixed_point {
    /// 18-decimal scale used for rates and redemption values
    pub const RATE_PRECISION: u128 = 1_000_000_000_000_000_000;

    /// Decimal places carried by `RATE_PRECISION`
    pub const RATE_DECIMALS: u8 = 18;

    /// Largest decimal count whose power of ten fits in a `u128`
    pub const MAX_DECIMALS: u8 = 38;
}

/// Time-related constants
pub mod time {
    /// Seconds per minute
    pub const SECS_PER_MINUTE: u64 = 60;

    /// Seconds per hour
    pub const SECS_PER_HOUR: u64 = 3600;

    /// Seconds per day
    pub const SECS_PER_DAY: u64 = 86400;

    /// Seconds in a 360-day year, the money-market day-count basis
    pub const THREESIXTY_DAYCOUNT_SECONDS: u64 = 360 * SECS_PER_DAY;

    /// Auction results younger than this are provisional (30 minutes)
    pub const DEFAULT_RATE_STALENESS_SECS: u64 = 30 * SECS_PER_MINUTE;
}

pub use fixed_point::*;
pub use time::*;
