use exam_core::model::{
    AuthoritativeResult, BankItem, DifficultyLevel, Grade, Phase, PhaseAuthorization, Subject,
};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::Row;

use crate::repository::StorageError;

// SQLite primary result codes (and extended variants) for a busy or locked database.
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Classify a driver error: busy/locked become `Contention`, unique violations
/// become `Conflict`, everything else is a connection failure.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db
            .code()
            .is_some_and(|code| BUSY_CODES.contains(&code.as_ref()))
        {
            return StorageError::Contention(db.message().to_owned());
        }
    }
    StorageError::Connection(e.to_string())
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn grade_i64(grade: Grade) -> i64 {
    i64::from(grade.value())
}

pub(crate) fn grade_from_i64(v: i64) -> Result<Grade, StorageError> {
    let value =
        u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid grade: {v}")))?;
    Grade::new(value).map_err(ser)
}

pub(crate) fn level_str(level: DifficultyLevel) -> String {
    level.code().to_string()
}

pub(crate) fn parse_phase(s: &str) -> Result<Phase, StorageError> {
    s.parse::<Phase>().map_err(ser)
}

pub(crate) fn counter_from_i64(v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid counter: {v}")))
}

pub(crate) fn map_item_row(row: &sqlx::sqlite::SqliteRow) -> Result<BankItem, StorageError> {
    let payload: String = row.try_get("payload").map_err(ser)?;
    let item: BankItem = from_json(&payload)?;
    BankItem::from_persisted(item).map_err(ser)
}

/// The `subject` column wins over the payload so a backfill never has to rewrite JSON.
pub(crate) fn map_result_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<AuthoritativeResult, StorageError> {
    let payload: String = row.try_get("payload").map_err(ser)?;
    let mut result: AuthoritativeResult = from_json(&payload)?;
    let subject: Option<String> = row.try_get("subject").map_err(ser)?;
    if let Some(name) = subject {
        result.subject = Some(Subject::new(name).map_err(ser)?);
    }
    AuthoritativeResult::from_persisted(result).map_err(ser)
}

pub(crate) fn map_authorization_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<PhaseAuthorization, StorageError> {
    let grade = grade_from_i64(row.try_get::<i64, _>("grade").map_err(ser)?)?;
    let phase = parse_phase(row.try_get::<String, _>("phase").map_err(ser)?.as_str())?;
    let authorized: bool = row.try_get("authorized").map_err(ser)?;
    let subjects: Vec<Subject> = from_json(&row.try_get::<String, _>("subjects").map_err(ser)?)?;
    Ok(PhaseAuthorization::new(grade, phase, authorized, subjects))
}
