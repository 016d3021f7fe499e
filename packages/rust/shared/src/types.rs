//! Core domain types shared across Enrichflow crates.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one batch run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// FailureLimit
// ---------------------------------------------------------------------------

/// A failure budget: how many failures are tolerated before escalating.
///
/// In config files `-1` or `"unlimited"` mean [`FailureLimit::Unlimited`];
/// any non-negative integer is a hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureLimit {
    /// Never escalate.
    Unlimited,
    /// Escalate once the failure count goes above this value.
    Limited(usize),
}

impl FailureLimit {
    /// Returns `true` if `count` failures exceed this budget.
    pub fn is_exceeded_by(self, count: usize) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Limited(max) => count > max,
        }
    }
}

impl Default for FailureLimit {
    fn default() -> Self {
        Self::Limited(0)
    }
}

impl std::fmt::Display for FailureLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Limited(max) => write!(f, "{max}"),
        }
    }
}

impl std::str::FromStr for FailureLimit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") || s == "-1" {
            return Ok(Self::Unlimited);
        }
        s.parse::<usize>()
            .map(Self::Limited)
            .map_err(|_| format!("invalid failure limit '{s}': expected a count, -1, or 'unlimited'"))
    }
}

impl Serialize for FailureLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Unlimited => serializer.serialize_i64(-1),
            Self::Limited(max) => serializer.serialize_u64(*max as u64),
        }
    }
}

impl<'de> Deserialize<'de> for FailureLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(-1) => Ok(Self::Unlimited),
            Raw::Count(n) if n >= 0 => Ok(Self::Limited(n as usize)),
            Raw::Count(n) => Err(serde::de::Error::custom(format!(
                "invalid failure limit {n}: expected -1 or a non-negative count"
            ))),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn failure_limit_budget() {
        assert!(!FailureLimit::Limited(2).is_exceeded_by(2));
        assert!(FailureLimit::Limited(2).is_exceeded_by(3));
        assert!(FailureLimit::Limited(0).is_exceeded_by(1));
        assert!(!FailureLimit::Unlimited.is_exceeded_by(usize::MAX));
    }

    #[test]
    fn failure_limit_deserializes_all_forms() {
        #[derive(Deserialize)]
        struct Wrapper {
            limit: FailureLimit,
        }

        let w: Wrapper = serde_json::from_str(r#"{"limit":-1}"#).unwrap();
        assert_eq!(w.limit, FailureLimit::Unlimited);
        let w: Wrapper = serde_json::from_str(r#"{"limit":"unlimited"}"#).unwrap();
        assert_eq!(w.limit, FailureLimit::Unlimited);
        let w: Wrapper = serde_json::from_str(r#"{"limit":5}"#).unwrap();
        assert_eq!(w.limit, FailureLimit::Limited(5));
        assert!(serde_json::from_str::<Wrapper>(r#"{"limit":-7}"#).is_err());
    }

    #[test]
    fn failure_limit_serializes_unlimited_as_minus_one() {
        assert_eq!(serde_json::to_string(&FailureLimit::Unlimited).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&FailureLimit::Limited(3)).unwrap(), "3");
    }
}
