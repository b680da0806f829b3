use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("subject name cannot be empty")]
    EmptySubject,

    #[error("topic name cannot be empty")]
    EmptyTopic,

    #[error("subject code must be two uppercase ASCII letters, got {0:?}")]
    InvalidSubjectCode(String),

    #[error("topic code must be 1-4 uppercase ASCII letters, got {0:?}")]
    InvalidTopicCode(String),

    #[error("grade must be between 1 and 99, got {0}")]
    InvalidGrade(u32),

    #[error("unknown difficulty level code: {0:?}")]
    InvalidLevel(String),
}

//
// ─── NAMES ─────────────────────────────────────────────────────────────────────
//

/// Human-readable subject name (e.g. "Matemáticas").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// # Errors
    ///
    /// Returns `CatalogError::EmptySubject` if the name is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, CatalogError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CatalogError::EmptySubject);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Topic within a subject (e.g. "Álgebra").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// # Errors
    ///
    /// Returns `CatalogError::EmptyTopic` if the name is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, CatalogError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CatalogError::EmptyTopic);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ─── CODES ─────────────────────────────────────────────────────────────────────
//

/// Two-letter subject code used as the leading segment of item codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectCode(String);

impl SubjectCode {
    /// # Errors
    ///
    /// Returns `CatalogError::InvalidSubjectCode` unless the code is exactly two
    /// uppercase ASCII letters.
    pub fn new(code: impl Into<String>) -> Result<Self, CatalogError> {
        let code = code.into();
        if code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(CatalogError::InvalidSubjectCode(code))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectCode {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectCode> for String {
    fn from(value: SubjectCode) -> Self {
        value.0
    }
}

/// Short topic code (1-4 uppercase letters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicCode(String);

impl TopicCode {
    /// # Errors
    ///
    /// Returns `CatalogError::InvalidTopicCode` for empty, too long or non-letter codes.
    pub fn new(code: impl Into<String>) -> Result<Self, CatalogError> {
        let code = code.into();
        if (1..=4).contains(&code.len()) && code.chars().all(|c| c.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(CatalogError::InvalidTopicCode(code))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TopicCode {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicCode> for String {
    fn from(value: TopicCode) -> Self {
        value.0
    }
}

/// School grade a bank item or authorization targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Grade(u8);

impl Grade {
    /// # Errors
    ///
    /// Returns `CatalogError::InvalidGrade` outside `1..=99`.
    pub fn new(value: u32) -> Result<Self, CatalogError> {
        match u8::try_from(value) {
            Ok(v) if (1..=99).contains(&v) => Ok(Self(v)),
            _ => Err(CatalogError::InvalidGrade(value)),
        }
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u32> for Grade {
    type Error = CatalogError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Grade> for u32 {
    fn from(value: Grade) -> Self {
        u32::from(value.0)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Difficulty band of a bank item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Basic,
    Intermediate,
    Advanced,
}

impl DifficultyLevel {
    /// Single-letter code used in item codes.
    #[must_use]
    pub fn code(self) -> char {
        match self {
            DifficultyLevel::Basic => 'B',
            DifficultyLevel::Intermediate => 'I',
            DifficultyLevel::Advanced => 'A',
        }
    }

    /// # Errors
    ///
    /// Returns `CatalogError::InvalidLevel` for anything but `B`, `I` or `A`.
    pub fn from_code(code: char) -> Result<Self, CatalogError> {
        match code {
            'B' => Ok(DifficultyLevel::Basic),
            'I' => Ok(DifficultyLevel::Intermediate),
            'A' => Ok(DifficultyLevel::Advanced),
            other => Err(CatalogError::InvalidLevel(other.to_string())),
        }
    }
}

//
// ─── SUBJECT CATALOG ───────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectEntry {
    pub code: SubjectCode,
    pub subject: Subject,
}

/// Fixed table mapping subject codes to subject names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectCatalog {
    entries: Vec<SubjectEntry>,
}

const DEFAULT_SUBJECTS: [(&str, &str); 5] = [
    ("MA", "Matemáticas"),
    ("LE", "Lenguaje"),
    ("CN", "Ciencias Naturales"),
    ("CS", "Ciencias Sociales"),
    ("IN", "Inglés"),
];

impl Default for SubjectCatalog {
    fn default() -> Self {
        let entries = DEFAULT_SUBJECTS
            .iter()
            .filter_map(|(code, name)| {
                Some(SubjectEntry {
                    code: SubjectCode::new(*code).ok()?,
                    subject: Subject::new(*name).ok()?,
                })
            })
            .collect();
        Self { entries }
    }
}

impl SubjectCatalog {
    #[must_use]
    pub fn new(entries: Vec<SubjectEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[SubjectEntry] {
        &self.entries
    }

    #[must_use]
    pub fn code_for(&self, subject: &Subject) -> Option<&SubjectCode> {
        self.entries
            .iter()
            .find(|e| &e.subject == subject)
            .map(|e| &e.code)
    }

    #[must_use]
    pub fn subject_for(&self, code: &SubjectCode) -> Option<&Subject> {
        self.entries
            .iter()
            .find(|e| &e.code == code)
            .map(|e| &e.subject)
    }

    /// Attribute an identifier to a subject by its leading code.
    ///
    /// Matching is case-insensitive on the first two characters.
    #[must_use]
    pub fn infer_from_identifier(&self, identifier: &str) -> Option<&Subject> {
        let prefix: String = identifier
            .trim()
            .chars()
            .take(2)
            .collect::<String>()
            .to_ascii_uppercase();
        self.entries
            .iter()
            .find(|e| e.code.as_str() == prefix)
            .map(|e| &e.subject)
    }
}
