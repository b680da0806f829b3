use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use exam_core::model::ProctorPolicy;

use crate::allocation::AllocationPolicy;
use crate::analysis::DEFAULT_NARRATIVE_TIMEOUT;
use crate::error::ConfigError;

pub const DEFAULT_DB_URL: &str = "sqlite:exam.sqlite3";
pub const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

/// Longest exam a configuration may ask for.
const MAX_EXAM_DAYS: i64 = 7;

/// Connection settings for the chat-completions narrative provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarrativeConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl NarrativeConfig {
    /// `None` when no API key is set, which disables the provider.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("EXAM_AI_API_KEY")?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url = lookup("EXAM_AI_BASE_URL").unwrap_or_else(|| DEFAULT_AI_BASE_URL.into());
        let model = lookup("EXAM_AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.into());
        Some(Self {
            base_url,
            api_key,
            model,
        })
    }
}

/// Engine-wide settings.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub exam_duration: Duration,
    pub question_count: usize,
    pub max_strikes: u8,
    pub weakness_ratio: f64,
    pub counter_max_attempts: u32,
    pub db_url: String,
    pub narrative: Option<NarrativeConfig>,
    pub narrative_timeout: StdDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exam_duration: Duration::seconds(3600),
            question_count: 10,
            max_strikes: 3,
            weakness_ratio: 0.5,
            counter_max_attempts: 32,
            db_url: DEFAULT_DB_URL.into(),
            narrative: None,
            narrative_timeout: DEFAULT_NARRATIVE_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from `EXAM_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value is set but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let duration_secs: i64 = parse(&lookup, "EXAM_DURATION_SECS")?
            .unwrap_or(defaults.exam_duration.num_seconds());
        if duration_secs <= 0 {
            return Err(invalid("EXAM_DURATION_SECS", duration_secs, "must be positive"));
        }
        let exam_duration = Duration::try_seconds(duration_secs)
            .filter(|d| *d <= Duration::days(MAX_EXAM_DAYS))
            .ok_or_else(|| invalid("EXAM_DURATION_SECS", duration_secs, "too long"))?;

        let question_count: usize =
            parse(&lookup, "EXAM_QUESTION_COUNT")?.unwrap_or(defaults.question_count);
        if question_count == 0 {
            return Err(invalid("EXAM_QUESTION_COUNT", question_count, "must be positive"));
        }

        let max_strikes: u8 = parse(&lookup, "EXAM_MAX_STRIKES")?.unwrap_or(defaults.max_strikes);
        if max_strikes == 0 {
            return Err(invalid("EXAM_MAX_STRIKES", max_strikes, "must be positive"));
        }

        let weakness_ratio: f64 =
            parse(&lookup, "EXAM_WEAKNESS_RATIO")?.unwrap_or(defaults.weakness_ratio);
        if !(0.0..=1.0).contains(&weakness_ratio) {
            return Err(invalid(
                "EXAM_WEAKNESS_RATIO",
                weakness_ratio,
                "must be between 0 and 1",
            ));
        }

        let counter_max_attempts: u32 =
            parse(&lookup, "EXAM_COUNTER_MAX_ATTEMPTS")?.unwrap_or(defaults.counter_max_attempts);
        if counter_max_attempts == 0 {
            return Err(invalid(
                "EXAM_COUNTER_MAX_ATTEMPTS",
                counter_max_attempts,
                "must be positive",
            ));
        }

        let timeout_secs: u64 = parse(&lookup, "EXAM_AI_TIMEOUT_SECS")?
            .unwrap_or(defaults.narrative_timeout.as_secs());
        if timeout_secs == 0 {
            return Err(invalid("EXAM_AI_TIMEOUT_SECS", timeout_secs, "must be positive"));
        }

        let db_url = lookup("EXAM_DB_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.db_url);

        Ok(Self {
            exam_duration,
            question_count,
            max_strikes,
            weakness_ratio,
            counter_max_attempts,
            db_url,
            narrative: NarrativeConfig::from_lookup(&lookup),
            narrative_timeout: StdDuration::from_secs(timeout_secs),
        })
    }

    #[must_use]
    pub fn proctor_policy(&self) -> ProctorPolicy {
        ProctorPolicy {
            max_strikes: self.max_strikes,
            duration: self.exam_duration,
        }
    }

    #[must_use]
    pub fn allocation_policy(&self) -> AllocationPolicy {
        AllocationPolicy {
            question_count: self.question_count,
            weakness_ratio: self.weakness_ratio,
            counter_max_attempts: self.counter_max_attempts,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key,
                value: raw,
                reason: "not a valid number",
            }),
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    }
}
