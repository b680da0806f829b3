use exam_core::model::{AttemptId, AuthoritativeResult, ItemCode, StudentId, Subject};
use sqlx::Row;
use std::collections::BTreeSet;

use super::SqliteRepository;
use super::mapping::{db_err, map_result_row, to_json};
use crate::repository::{ResultRepository, StorageError};

#[async_trait::async_trait]
impl ResultRepository for SqliteRepository {
    async fn append_result(
        &self,
        group: &str,
        result: &AuthoritativeResult,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r"
            INSERT INTO results (
                group_name, id, student_id, subject, phase, completed, payload, recorded_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(group)
        .bind(result.id.as_str())
        .bind(result.student_id.as_str())
        .bind(result.subject.as_ref().map(|s| s.as_str().to_owned()))
        .bind(result.phase.as_str())
        .bind(result.completed)
        .bind(to_json(result)?)
        .bind(result.ended_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let codes: BTreeSet<String> = result
            .answers
            .iter()
            .map(|a| a.question.to_string())
            .collect();
        for code in codes {
            sqlx::query(
                r"
                INSERT INTO result_items (group_name, result_id, item_code)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(group)
            .bind(result.id.as_str())
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_results(
        &self,
        group: &str,
        student: &StudentId,
    ) -> Result<Vec<AuthoritativeResult>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, subject, payload
            FROM results
            WHERE group_name = ?1 AND student_id = ?2
            ORDER BY recorded_at ASC, rowid ASC
            ",
        )
        .bind(group)
        .bind(student.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // One undecodable row must not hide the rest of the student's history.
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            match map_result_row(row) {
                Ok(result) => results.push(result),
                Err(err) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    tracing::warn!(group, student = %student, id, error = %err, "skipping unreadable result row");
                }
            }
        }
        Ok(results)
    }

    async fn backfill_subject(
        &self,
        group: &str,
        id: &AttemptId,
        subject: &Subject,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE results SET subject = ?3
            WHERE group_name = ?1 AND id = ?2 AND subject IS NULL
            ",
        )
        .bind(group)
        .bind(id.as_str())
        .bind(subject.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing updated: either already tagged, or missing entirely.
        sqlx::query("SELECT 1 FROM results WHERE group_name = ?1 AND id = ?2")
            .bind(group)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn is_item_referenced(&self, code: &ItemCode) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM result_items WHERE item_code = ?1 LIMIT 1")
            .bind(code.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }
}
