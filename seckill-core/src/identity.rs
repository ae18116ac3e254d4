//! Identity types for flash-sale entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

numeric_id!(
    /// The purchasing party (a logged-in user in the outer application).
    ActorId,
    i64
);

numeric_id!(
    /// A limited-stock resource offered in a flash sale.
    ResourceId,
    i64
);

numeric_id!(
    /// Composite order identifier produced by the id generator.
    ///
    /// Layout: `(seconds since epoch anchor << 32) | daily sequence`.
    OrderId,
    u64
);

/// Holder token stored in a lock record.
///
/// Generated fresh for every acquisition attempt so that release can prove
/// the caller is the current holder, independent of which thread or task
/// happens to run the release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    /// Generate a new timestamp-sortable token.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// The exact string written into the KV store.
    pub fn to_store_value(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id_roundtrip_through_string() {
        let id = ResourceId::new(42);
        let parsed: ResourceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_numeric_id_serializes_transparently() {
        let json = serde_json::to_string(&ActorId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn test_lease_tokens_are_unique() {
        let a = LeaseToken::generate();
        let b = LeaseToken::generate();
        assert_ne!(a, b);
        assert_ne!(a.to_store_value(), b.to_store_value());
    }

    #[test]
    fn test_lease_token_store_value_has_no_hyphens() {
        let token = LeaseToken::generate();
        let value = token.to_store_value();
        assert_eq!(value.len(), 32);
        assert!(!value.contains('-'));
    }
}
