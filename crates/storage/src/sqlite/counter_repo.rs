use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{counter_from_i64, db_err, ser};
use crate::repository::{CounterRepository, StorageError};

#[async_trait::async_trait]
impl CounterRepository for SqliteRepository {
    async fn read_counter(&self, key: &str) -> Result<Option<u32>, StorageError> {
        let row = sqlx::query("SELECT value FROM item_counters WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|r| counter_from_i64(r.try_get::<i64, _>("value").map_err(ser)?))
            .transpose()
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u32>,
        next: u32,
    ) -> Result<bool, StorageError> {
        // Each branch is a single statement, so SQLite applies it atomically.
        let res = match expected {
            None => {
                sqlx::query(
                    r"
                    INSERT INTO item_counters (key, value)
                    VALUES (?1, ?2)
                    ON CONFLICT(key) DO NOTHING
                    ",
                )
                .bind(key)
                .bind(i64::from(next))
                .execute(&self.pool)
                .await
            }
            Some(current) => {
                sqlx::query("UPDATE item_counters SET value = ?3 WHERE key = ?1 AND value = ?2")
                    .bind(key)
                    .bind(i64::from(current))
                    .bind(i64::from(next))
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;

        Ok(res.rows_affected() == 1)
    }
}
