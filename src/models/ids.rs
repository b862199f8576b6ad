//! String identifier newtypes.
//!
//! Every identifier in the network is an opaque string. Natural keys are
//! canonical: an edge is addressed by `(tenant, source, destination)`, never by
//! a surrogate id.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is empty or whitespace.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Tenant identifier. Every record is scoped to exactly one tenant.
    TenantId
);

string_id!(
    /// Agent identifier, unique within a tenant.
    AgentId
);

string_id!(
    /// Nutrient identifier.
    NutrientId
);

string_id!(
    /// Correlation id linking a broadcast, its routes and its outcome.
    TraceId
);

string_id!(
    /// Route identifier.
    RouteId
);

string_id!(
    /// Memory record identifier.
    MemoryId
);

impl NutrientId {
    /// Generates a fresh, time-ordered nutrient id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("nut_{}", uuid::Uuid::now_v7().simple()))
    }
}

impl TraceId {
    /// Generates a fresh trace id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("trc_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl RouteId {
    /// Generates a fresh, time-ordered route id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("rte_{}", uuid::Uuid::now_v7().simple()))
    }
}

impl MemoryId {
    /// Generates a fresh, time-ordered memory id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("mem_{}", uuid::Uuid::now_v7().simple()))
    }
}

/// Natural key of an edge: `(tenant, source, destination)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Source agent.
    pub source: AgentId,
    /// Destination agent.
    pub destination: AgentId,
}

impl EdgeKey {
    /// Creates an edge key.
    #[must_use]
    pub fn new(tenant: TenantId, source: AgentId, destination: AgentId) -> Self {
        Self {
            tenant,
            source,
            destination,
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.tenant, self.source, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_blank() {
        let tenant = TenantId::new("acme");
        assert_eq!(tenant.to_string(), "acme");
        assert!(!tenant.is_blank());
        assert!(TenantId::new("  ").is_blank());
    }

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = NutrientId::generate();
        let b = NutrientId::generate();
        assert!(a.as_str().starts_with("nut_"));
        assert_ne!(a, b);
        assert!(TraceId::generate().as_str().starts_with("trc_"));
    }

    #[test]
    fn test_edge_key_display() {
        let key = EdgeKey::new("t1".into(), "a".into(), "b".into());
        assert_eq!(key.to_string(), "t1:a->b");
    }

    #[test]
    fn test_serde_transparent() {
        let id = AgentId::new("planner");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"planner\"");
    }
}
