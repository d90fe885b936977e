//! Core types for the repo ledger

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            /// Create a new identifier from its raw value
            #[must_use]
            pub const fn new(id: $inner) -> Self {
                Self(id)
            }

            /// Raw identifier value
            #[must_use]
            pub const fn raw(&self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

ledger_id!(
    /// Identifier of a repo token (maturing debt instrument)
    InstrumentId(u64),
    "REPO"
);
ledger_id!(
    /// Identifier of a submitted auction offer
    OfferId(u64),
    "OFFER"
);
ledger_id!(
    /// Identity of an auction; offers are ordered by it
    AuctionId(u64),
    "AUCTION"
);
ledger_id!(
    /// Identifier shared by every instrument of one term (repo family)
    FamilyId(u64),
    "TERM"
);
ledger_id!(
    /// Identifier of a fungible asset (purchase or collateral token)
    AssetId(u32),
    "ASSET"
);
ledger_id!(
    /// Identifier of a collateral token accepted by a term
    CollateralId(u32),
    "COLL"
);
ledger_id!(
    /// Identity of a caller for role-gated operations
    OperatorId(u64),
    "OP"
);

/// Timestamp in whole seconds since UNIX epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Get current timestamp
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        Self(duration.as_secs())
    }

    /// Create timestamp from seconds
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Get timestamp as seconds
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds from `self` until `later`, zero if `later` is not in the future
    #[must_use]
    pub const fn secs_until(&self, later: Self) -> u64 {
        later.0.saturating_sub(self.0)
    }

    /// Seconds elapsed since `earlier`, zero if `earlier` is in the future
    #[must_use]
    pub const fn secs_since(&self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Shift forward by `secs`
    #[must_use]
    pub const fn plus_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Shift backward by `secs`
    #[must_use]
    pub const fn minus_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
