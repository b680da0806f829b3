use chrono::Utc;
use exam_core::model::{
    Grade, Phase, PhaseAuthorization, PhaseProgressRecord, StudentId, Subject, WeaknessAnalysis,
};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{db_err, from_json, grade_i64, map_authorization_row, ser, to_json};
use crate::repository::{
    AuthorizationRepository, ProgressRepository, StorageError, WeaknessRepository,
};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        student: &StudentId,
        phase: Phase,
    ) -> Result<Option<PhaseProgressRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT payload FROM progress_cache WHERE student_id = ?1 AND phase = ?2",
        )
        .bind(student.as_str())
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| from_json(&r.try_get::<String, _>("payload").map_err(ser)?))
            .transpose()
    }

    async fn upsert_progress(&self, record: &PhaseProgressRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO progress_cache (student_id, phase, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(student_id, phase) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.student_id.as_str())
        .bind(record.phase.as_str())
        .bind(to_json(record)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthorizationRepository for SqliteRepository {
    async fn get_authorization(
        &self,
        grade: Grade,
        phase: Phase,
    ) -> Result<Option<PhaseAuthorization>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT grade, phase, authorized, subjects
            FROM phase_authorizations
            WHERE grade = ?1 AND phase = ?2
            ",
        )
        .bind(grade_i64(grade))
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_authorization_row).transpose()
    }

    async fn upsert_authorization(&self, auth: &PhaseAuthorization) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO phase_authorizations (grade, phase, authorized, subjects)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(grade, phase) DO UPDATE SET
                authorized = excluded.authorized,
                subjects = excluded.subjects
            ",
        )
        .bind(grade_i64(auth.grade))
        .bind(auth.phase.as_str())
        .bind(auth.authorized)
        .bind(to_json(&auth.subjects)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl WeaknessRepository for SqliteRepository {
    async fn put_analysis(&self, analysis: &WeaknessAnalysis) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO weakness_analyses (student_id, subject, payload, generated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(student_id, subject) DO UPDATE SET
                payload = excluded.payload,
                generated_at = excluded.generated_at
            ",
        )
        .bind(analysis.student_id.as_str())
        .bind(analysis.subject.as_str())
        .bind(to_json(analysis)?)
        .bind(analysis.generated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_analysis(
        &self,
        student: &StudentId,
        subject: &Subject,
    ) -> Result<Option<WeaknessAnalysis>, StorageError> {
        let row = sqlx::query(
            "SELECT payload FROM weakness_analyses WHERE student_id = ?1 AND subject = ?2",
        )
        .bind(student.as_str())
        .bind(subject.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| from_json(&r.try_get::<String, _>("payload").map_err(ser)?))
            .transpose()
    }
}
