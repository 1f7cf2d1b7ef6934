// PostgreSQL reading store (`devices` table, owned by the upstream producer).
// Expected columns: device_id INTEGER, time TIMESTAMP or TIMESTAMPTZ, latitude/longitude/temperature
// DOUBLE PRECISION. A zone-less TIMESTAMP is read as UTC (sqlx pins the session TimeZone to UTC).

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::postgres::PgPool;

use crate::error::{EtlError, StoreKind};
use crate::models::Reading;
use crate::store::ReadingStore;

const SELECT_READINGS: &str = r#"
    SELECT device_id, "time"::timestamptz AS "time", latitude, longitude, temperature
    FROM devices
    WHERE $1::timestamptz IS NULL OR "time" >= $1
    ORDER BY device_id, date_trunc('hour', "time"), "time"
"#;

pub struct PgReadingRepo {
    pool: PgPool,
}

impl PgReadingRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ReadingStore for PgReadingRepo {
    /// Rows are streamed, so a large table is never materialised in one Vec.
    fn fetch_readings_grouped_by_hour(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<Reading, EtlError>> {
        tracing::debug!(repo = "readings", operation = "fetch_readings_grouped_by_hour", ?since);
        sqlx::query_as::<_, Reading>(SELECT_READINGS)
            .bind(since)
            .fetch(&self.pool)
            .map_err(|e| EtlError::from_sqlx(StoreKind::Readings, e))
            .boxed()
    }
}
