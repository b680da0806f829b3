use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::catalog::{CatalogError, DifficultyLevel, Grade, SubjectCode, TopicCode};

/// Highest serial representable in the three-digit suffix.
pub const MAX_SERIAL: u32 = 999;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ItemCodeError {
    #[error("serial {0} does not fit in three digits")]
    SerialOverflow(u32),

    #[error("serial must start at 1")]
    ZeroSerial,

    #[error("malformed item code {code:?}: {reason}")]
    Malformed { code: String, reason: &'static str },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// The `{subjectCode}{topicCode}{grade}{levelCode}` tuple a serial counter is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeKey {
    pub subject: SubjectCode,
    pub topic: TopicCode,
    pub grade: Grade,
    pub level: DifficultyLevel,
}

impl CodeKey {
    #[must_use]
    pub fn new(subject: SubjectCode, topic: TopicCode, grade: Grade, level: DifficultyLevel) -> Self {
        Self {
            subject,
            topic,
            grade,
            level,
        }
    }

    /// Identifier of the counter document for this key.
    #[must_use]
    pub fn counter_key(&self) -> String {
        format!(
            "{}{}{}{}",
            self.subject.as_str(),
            self.topic.as_str(),
            self.grade,
            self.level.code()
        )
    }
}

impl fmt::Display for CodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.counter_key())
    }
}

/// Unique, human-meaningless code of one bank item: `{key}{serial:03}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemCode {
    key: CodeKey,
    serial: u32,
}

impl ItemCode {
    /// # Errors
    ///
    /// Returns `ItemCodeError::ZeroSerial` or `ItemCodeError::SerialOverflow`
    /// when `serial` is outside `1..=999`.
    pub fn new(key: CodeKey, serial: u32) -> Result<Self, ItemCodeError> {
        if serial == 0 {
            return Err(ItemCodeError::ZeroSerial);
        }
        if serial > MAX_SERIAL {
            return Err(ItemCodeError::SerialOverflow(serial));
        }
        Ok(Self { key, serial })
    }

    #[must_use]
    pub fn key(&self) -> &CodeKey {
        &self.key
    }

    #[must_use]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    #[must_use]
    pub fn subject_code(&self) -> &SubjectCode {
        &self.key.subject
    }

    /// Parse a stored code back into its components.
    ///
    /// Layout: two letters, 1-4 letters, 1-2 digits, one level letter, three digits.
    ///
    /// # Errors
    ///
    /// Returns `ItemCodeError::Malformed` when the layout does not match.
    pub fn parse(raw: &str) -> Result<Self, ItemCodeError> {
        let malformed = |reason| ItemCodeError::Malformed {
            code: raw.to_string(),
            reason,
        };
        if !raw.is_ascii() {
            return Err(malformed("non-ascii characters"));
        }
        if raw.len() < 8 {
            return Err(malformed("too short"));
        }

        let (head, serial_raw) = raw.split_at(raw.len() - 3);
        if !serial_raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed("serial must be three digits"));
        }
        let serial: u32 = serial_raw
            .parse()
            .map_err(|_| malformed("serial must be three digits"))?;

        let (head, level_raw) = head.split_at(head.len() - 1);
        let level = level_raw
            .chars()
            .next()
            .ok_or_else(|| malformed("missing level"))
            .and_then(|c| DifficultyLevel::from_code(c).map_err(ItemCodeError::from))?;

        let digits_start = head
            .rfind(|c: char| !c.is_ascii_digit())
            .map_or(0, |i| i + 1);
        let (letters, grade_raw) = head.split_at(digits_start);
        if grade_raw.is_empty() {
            return Err(malformed("missing grade"));
        }
        let grade_value: u32 = grade_raw.parse().map_err(|_| malformed("invalid grade"))?;
        let grade = Grade::new(grade_value)?;

        if letters.len() < 3 {
            return Err(malformed("missing subject or topic code"));
        }
        let (subject_raw, topic_raw) = letters.split_at(2);
        let subject = SubjectCode::new(subject_raw)?;
        let topic = TopicCode::new(topic_raw)?;

        Self::new(CodeKey::new(subject, topic, grade, level), serial)
    }
}

impl fmt::Display for ItemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.key, self.serial)
    }
}

impl FromStr for ItemCode {
    type Err = ItemCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ItemCode {
    type Error = ItemCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ItemCode> for String {
    fn from(value: ItemCode) -> Self {
        value.to_string()
    }
}

impl PartialOrd for ItemCode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemCode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}
