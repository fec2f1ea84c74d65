//! Globally unique identifiers used throughout casegate.
//!
//! All entity IDs wrap a UUID. Locally minted IDs use UUIDv7 for
//! time-ordered sorting; IDs received from the presentation layer arrive
//! as strings and are parsed with [`std::str::FromStr`], which is where
//! malformed identifiers are rejected before any ledger call.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CasegateError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CasegateError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| CasegateError::InvalidIdentifier {
                        field: $field,
                        reason: e.to_string(),
                    })
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Accounts and catalog
// ---------------------------------------------------------------------------

uuid_id!(
    /// Unique identifier for a user account on the ledger.
    UserId,
    "user_id"
);

uuid_id!(
    /// A purchasable case in the catalog.
    CaseId,
    "case_id"
);

uuid_id!(
    /// A skin that can drop from a case.
    SkinId,
    "skin_id"
);

uuid_id!(
    /// A coin grant that can drop from a case.
    CoinRewardId,
    "coin_reward_id"
);

// ---------------------------------------------------------------------------
// Inventory and sessions
// ---------------------------------------------------------------------------

uuid_id!(
    /// One owned item in a user's inventory.
    InventoryItemId,
    "inventory_item_id"
);

uuid_id!(
    /// Opaque handle correlating a reloaded or retried gesture with the
    /// case opening already in flight.
    SessionId,
    "session_id"
);
