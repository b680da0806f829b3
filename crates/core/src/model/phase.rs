use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown phase: {0}")]
pub struct PhaseParseError(pub String);

/// One of the three ordered assessment stages a student moves through per subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    First,
    Second,
    Third,
}

impl Phase {
    /// All phases in evaluation order.
    pub const ALL: [Phase; 3] = [Phase::First, Phase::Second, Phase::Third];

    /// The phase that follows this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::First => Some(Phase::Second),
            Phase::Second => Some(Phase::Third),
            Phase::Third => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::First => "first",
            Phase::Second => "second",
            Phase::Third => "third",
        }
    }

    /// Zero-based position in `Phase::ALL`.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Phase::First => 0,
            Phase::Second => 1,
            Phase::Third => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "1" => Ok(Phase::First),
            "second" | "2" => Ok(Phase::Second),
            "third" | "3" => Ok(Phase::Third),
            other => Err(PhaseParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered_and_chained() {
        assert_eq!(Phase::First.next(), Some(Phase::Second));
        assert_eq!(Phase::Second.next(), Some(Phase::Third));
        assert_eq!(Phase::Third.next(), None);
        assert!(Phase::First < Phase::Third);
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
    }

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!("Second".parse::<Phase>().unwrap(), Phase::Second);
        assert_eq!("3".parse::<Phase>().unwrap(), Phase::Third);
        assert!("fourth".parse::<Phase>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Phase::First).unwrap();
        assert_eq!(json, "\"first\"");
    }
}
