// MySQL aggregate store: `aggregated_data`, primary key (device_id, hour).
// Writes are whole-row overwrites (ON DUPLICATE KEY UPDATE), one transaction per pass.

use chrono::NaiveDateTime;
use sqlx::Row;
use sqlx::mysql::MySqlPool;
use tracing::instrument;

use crate::error::{EtlError, StoreKind};
use crate::models::{AggregateBatch, AggregateRecord};
use crate::store::AggregateStore;

fn db_err(e: sqlx::Error) -> EtlError {
    EtlError::from_sqlx(StoreKind::Aggregates, e)
}

pub struct MySqlAggregateRepo {
    pool: MySqlPool,
}

impl MySqlAggregateRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Create the table if it doesn't exist. `hour` is stored as a naive UTC DATETIME.
    pub async fn init(&self) -> Result<(), EtlError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregated_data (
                device_id INT NOT NULL,
                hour DATETIME NOT NULL,
                max_temperature DOUBLE NOT NULL,
                data_points BIGINT NOT NULL,
                total_distance DOUBLE NOT NULL,
                PRIMARY KEY (device_id, hour)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// All stored rows ordered by (device_id, hour). For inspection and tests.
    #[instrument(skip(self), fields(repo = "aggregates", operation = "get_aggregates"))]
    pub async fn get_aggregates(&self) -> Result<Vec<AggregateRecord>, EtlError> {
        let rows = sqlx::query(
            "SELECT device_id, hour, max_temperature, data_points, total_distance
             FROM aggregated_data ORDER BY device_id, hour",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let hour: NaiveDateTime = row.try_get("hour").map_err(db_err)?;
            out.push(AggregateRecord {
                device_id: row.try_get("device_id").map_err(db_err)?,
                hour: hour.and_utc(),
                max_temperature: row.try_get("max_temperature").map_err(db_err)?,
                data_points: row.try_get("data_points").map_err(db_err)?,
                total_distance: row.try_get("total_distance").map_err(db_err)?,
            });
        }
        Ok(out)
    }
}

impl AggregateStore for MySqlAggregateRepo {
    #[instrument(skip(self, batch), fields(repo = "aggregates", operation = "upsert_aggregates", records = batch.len()))]
    async fn upsert_aggregates(&self, batch: &AggregateBatch) -> Result<usize, EtlError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for record in batch.values() {
            sqlx::query(
                r#"
                INSERT INTO aggregated_data
                    (device_id, hour, max_temperature, data_points, total_distance)
                VALUES (?, ?, ?, ?, ?) AS new
                ON DUPLICATE KEY UPDATE
                    max_temperature = new.max_temperature,
                    data_points = new.data_points,
                    total_distance = new.total_distance
                "#,
            )
            .bind(record.device_id)
            .bind(record.hour.naive_utc())
            .bind(record.max_temperature)
            .bind(record.data_points)
            .bind(record.total_distance)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(batch.len())
    }
}
