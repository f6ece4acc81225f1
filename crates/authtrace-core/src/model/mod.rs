//! Activity data model: typed tokens plus the activity / concept change /
//! component change records persisted one-per-commit.
//!
//! Every enum here has a canonical upper-snake-case wire token
//! (`CONTENT_CHANGE`, `REFERENCE_SET_MEMBER`, ...). Parsing an unknown
//! token is a typed [`UnknownToken`] error, never a silent fallback: a
//! misclassified component would corrupt every later change summary.

pub mod activity;

pub use activity::{Activity, ComponentChange, ConceptChange};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an unrecognised wire token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{raw}': expected one of {expected}")]
pub struct UnknownToken {
    /// Which token family was being parsed.
    pub kind: &'static str,
    /// The unrecognised input string.
    pub raw: String,
    /// Comma-separated list of accepted tokens.
    pub expected: &'static str,
}

macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $token:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Canonical wire token.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $token),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownToken;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($token => Ok(Self::$variant),)+
                    _ => Err(UnknownToken {
                        kind: $kind,
                        raw: s.to_string(),
                        expected: concat!($($token, " "),+),
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

token_enum! {
    /// What kind of commit an activity records.
    ActivityType, "activity type" {
        /// Manual authoring edit.
        ContentChange => "CONTENT_CHANGE",
        /// Classifier output saved (inferred relationships only).
        ClassificationSave => "CLASSIFICATION_SAVE",
        /// Parent content merged down into a child branch.
        Rebase => "REBASE",
        /// Child content merged up into its parent.
        Promotion => "PROMOTION",
        /// A code system release was versioned on this branch.
        CreateCodeSystemVersion => "CREATE_CODE_SYSTEM_VERSION",
    }
}

token_enum! {
    /// Terminology component families.
    ComponentType, "componentType" {
        Concept => "CONCEPT",
        Description => "DESCRIPTION",
        Relationship => "RELATIONSHIP",
        ReferenceSetMember => "REFERENCE_SET_MEMBER",
        OwlAxiom => "OWL_AXIOM",
    }
}

token_enum! {
    /// How a component was changed by a commit.
    ChangeType, "changeType" {
        Create => "CREATE",
        Update => "UPDATE",
        Delete => "DELETE",
        Inactivate => "INACTIVATE",
    }
}

/// Finer classification of a component within its type.
///
/// Descriptions carry their term type, relationships their characteristic
/// type; anything else (typically a reference set id) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentSubType {
    Fsn,
    Synonym,
    TextDefinition,
    Stated,
    Inferred,
    Additional,
    Other(String),
}

impl ComponentSubType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Fsn => "FSN",
            Self::Synonym => "SYNONYM",
            Self::TextDefinition => "TEXT_DEFINITION",
            Self::Stated => "STATED",
            Self::Inferred => "INFERRED",
            Self::Additional => "ADDITIONAL",
            Self::Other(raw) => raw,
        }
    }

    /// Map a relationship `characteristicType` to a sub type.
    ///
    /// Accepts both the short (`INFERRED`) and long
    /// (`INFERRED_RELATIONSHIP`) spellings.
    #[must_use]
    pub fn from_characteristic_type(raw: &str) -> Self {
        match raw.trim_end_matches("_RELATIONSHIP") {
            "STATED" => Self::Stated,
            "INFERRED" => Self::Inferred,
            "ADDITIONAL" => Self::Additional,
            _ => Self::Other(raw.to_string()),
        }
    }
}

impl From<&str> for ComponentSubType {
    fn from(raw: &str) -> Self {
        match raw {
            "FSN" => Self::Fsn,
            "SYNONYM" => Self::Synonym,
            "TEXT_DEFINITION" => Self::TextDefinition,
            "STATED" | "STATED_RELATIONSHIP" => Self::Stated,
            "INFERRED" | "INFERRED_RELATIONSHIP" => Self::Inferred,
            "ADDITIONAL" | "ADDITIONAL_RELATIONSHIP" => Self::Additional,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ComponentSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ComponentSubType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ComponentSubType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}
