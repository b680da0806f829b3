use exam_core::model::{BankItem, ItemCode};

use super::SqliteRepository;
use super::mapping::{db_err, grade_i64, level_str, map_item_row, to_json};
use crate::repository::{BankItemFilter, BankItemRepository, StorageError};

#[async_trait::async_trait]
impl BankItemRepository for SqliteRepository {
    async fn insert_item(&self, item: &BankItem) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO bank_items (code, subject, topic, grade, level, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(item.code.to_string())
        .bind(item.subject.as_str())
        .bind(item.topic.as_str())
        .bind(grade_i64(item.grade()))
        .bind(level_str(item.level()))
        .bind(to_json(item)?)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_item(&self, code: &ItemCode) -> Result<BankItem, StorageError> {
        let row = sqlx::query("SELECT payload FROM bank_items WHERE code = ?1")
            .bind(code.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        map_item_row(&row)
    }

    async fn list_items(&self, filter: &BankItemFilter) -> Result<Vec<BankItem>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT payload
            FROM bank_items
            WHERE (?1 IS NULL OR subject = ?1)
              AND (?2 IS NULL OR topic = ?2)
              AND (?3 IS NULL OR grade = ?3)
              AND (?4 IS NULL OR level = ?4)
            ORDER BY code ASC
            ",
        )
        .bind(filter.subject.as_ref().map(|s| s.as_str().to_owned()))
        .bind(filter.topic.as_ref().map(|t| t.as_str().to_owned()))
        .bind(filter.grade.map(grade_i64))
        .bind(filter.level.map(level_str))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_item_row).collect()
    }

    async fn delete_item(&self, code: &ItemCode) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM bank_items WHERE code = ?1")
            .bind(code.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
