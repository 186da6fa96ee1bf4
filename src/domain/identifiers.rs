//! Strongly-typed identifiers.
//!
//! Uuid-backed ids are generated by the engine. String-backed ids come
//! from external messages and are carried verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing uuid
            pub fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            /// Get the underlying uuid
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parse from the hyphenated string form
            pub fn parse(value: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(value).map(Self)
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
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the raw string value
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

uuid_id!(
    /// Identifies one orchestration instance
    OrchestrationInstanceId
);

uuid_id!(
    /// Identifies one step inside an orchestration instance
    StepInstanceId
);

uuid_id!(
    /// Storage identity of a persisted orchestration description
    OrchestrationDescriptionId
);

string_id!(
    /// Caller-supplied token used to deduplicate start requests
    IdempotencyKey
);

string_id!(
    /// Id of the actor message that triggered a start
    ActorMessageId
);

string_id!(
    /// Business transaction id carried by the triggering message
    TransactionId
);

string_id!(MeteringPointId);

/// Identity key of an orchestration description: name plus version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrchestrationDescriptionUniqueName {
    pub name: String,
    pub version: u32,
}

impl OrchestrationDescriptionUniqueName {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse the `name_vN` display form
    pub fn parse(value: &str) -> Option<Self> {
        let (name, version) = value.rsplit_once("_v")?;
        let version: u32 = version.parse().ok()?;
        if name.is_empty() || version == 0 {
            return None;
        }
        Some(Self::new(name, version))
    }
}

impl fmt::Display for OrchestrationDescriptionUniqueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_v{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name_display_and_parse() {
        let unique_name = OrchestrationDescriptionUniqueName::new("Brs_023_027", 1);
        assert_eq!(unique_name.to_string(), "Brs_023_027_v1");

        let parsed = OrchestrationDescriptionUniqueName::parse("Brs_023_027_v1").unwrap();
        assert_eq!(parsed, unique_name);

        assert!(OrchestrationDescriptionUniqueName::parse("Brs_023_027").is_none());
        assert!(OrchestrationDescriptionUniqueName::parse("Brs_v0").is_none());
    }

    #[test]
    fn test_instance_id_serializes_as_plain_uuid() {
        let id = OrchestrationInstanceId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let parsed: OrchestrationInstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
