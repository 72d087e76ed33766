//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
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
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(LineageId, uuid);
define_id!(DeliveryHandle);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lineage_ids_are_unique() {
        let a = LineageId::new();
        let b = LineageId::new();
        assert_ne!(a, b);
        // hyphenated UUID: 128 bits of which 122 random
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_from_string_rejects_empty() {
        assert!(LineageId::from_string(String::new()).is_err());
        assert!(DeliveryHandle::from_string(String::new()).is_err());
        assert_eq!(
            DeliveryHandle::from_string("msg-1".to_string()).unwrap().as_str(),
            "msg-1"
        );
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = LineageId::from_string("A".to_string()).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"A\"");
        let back: LineageId = serde_json::from_str("\"A\"").unwrap();
        assert_eq!(back, id);
    }
}
