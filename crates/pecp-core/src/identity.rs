//! # Identifier Newtypes
//!
//! Catalog records are keyed by monotonically assigned integers. Each record
//! kind gets its own type so identifiers cannot be mixed up across tables.
//! All identifiers serialize as bare JSON numbers.

use serde::{Deserialize, Serialize};

macro_rules! catalog_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw catalog identifier.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Access the raw integer value.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map(Self)
            }
        }
    };
}

catalog_id!(
    /// Identifier of a [`Policy`](crate::Policy).
    PolicyId
);
catalog_id!(
    /// Identifier of a [`Binding`](crate::Binding).
    BindingId
);
catalog_id!(
    /// Identifier of a [`Bundle`](crate::Bundle).
    BundleId
);
catalog_id!(
    /// Identifier of an [`Entitlement`](crate::Entitlement).
    EntitlementId
);
catalog_id!(
    /// Identifier of a [`ResourceType`](crate::ResourceType).
    ResourceTypeId
);
