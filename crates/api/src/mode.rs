use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The routing mode of the engine.
///
/// Decides which proxy groups are relevant to the user at all.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RoutingMode {
    /// No proxying. Selections have no meaning.
    Direct,

    /// Everything goes through the single aggregate group.
    Global,

    /// Traffic is matched against rules, the full group topology applies.
    #[default]
    RuleBased,
}

impl RoutingMode {
    /// The name the engine uses for this mode on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Global => "global",
            Self::RuleBased => "rule",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a routing mode.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown routing mode: {0}")]
pub struct ModeParseError(pub String);

impl FromStr for RoutingMode {
    type Err = ModeParseError;

    // Older engines report capitalized names ("Rule"), newer ones lowercase.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "global" => Ok(Self::Global),
            "rule" | "rule-based" | "rulebased" => Ok(Self::RuleBased),
            _ => Err(ModeParseError(s.to_string())),
        }
    }
}

impl Serialize for RoutingMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoutingMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
