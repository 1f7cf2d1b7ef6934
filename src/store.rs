// Capability contracts for the two stores, plus the sqlx-backed connector used in production.
// The pass and the runner depend only on these traits.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument};

use crate::aggregate_repo::MySqlAggregateRepo;
use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::error::{EtlError, StoreKind};
use crate::models::{AggregateBatch, Reading};
use crate::reading_repo::PgReadingRepo;

/// Read side. Never written to by the ETL.
pub trait ReadingStore: Send + Sync {
    /// Readings at or after `since` (all when `None`), ordered by device, hour, time.
    /// The aggregator re-sorts within each bucket, so the order is an optimisation only.
    fn fetch_readings_grouped_by_hour(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<Reading, EtlError>>;
}

/// Write side: insert-or-overwrite keyed by (device_id, hour).
pub trait AggregateStore: Send + Sync {
    /// Upsert every record of `batch` in one transaction. Returns the number of records written.
    fn upsert_aggregates(
        &self,
        batch: &AggregateBatch,
    ) -> impl Future<Output = Result<usize, EtlError>> + Send;
}

/// Opens both stores. The runner only leaves `Connecting` when this succeeds.
pub trait StoreConnector: Send + Sync {
    type Readings: ReadingStore;
    type Aggregates: AggregateStore;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<(Self::Readings, Self::Aggregates), EtlError>> + Send;
}

/// PostgreSQL readings + MySQL aggregates over sqlx pools.
pub struct SqlConnector {
    connections: ConnectionConfig,
    database: DatabaseConfig,
}

impl SqlConnector {
    pub fn new(connections: ConnectionConfig, database: DatabaseConfig) -> Self {
        Self {
            connections,
            database,
        }
    }
}

impl StoreConnector for SqlConnector {
    type Readings = PgReadingRepo;
    type Aggregates = MySqlAggregateRepo;

    #[instrument(skip(self), fields(operation = "connect"))]
    async fn connect(&self) -> Result<(PgReadingRepo, MySqlAggregateRepo), EtlError> {
        let acquire_timeout = Duration::from_secs(self.database.acquire_timeout_secs);

        // test_before_acquire (on by default) pings pooled connections before handing them out.
        let pg = PgPoolOptions::new()
            .max_connections(self.database.max_pool_size)
            .acquire_timeout(acquire_timeout)
            .connect(&self.connections.readings_url)
            .await
            .map_err(|e| EtlError::from_sqlx(StoreKind::Readings, e))?;
        info!("connected to reading store");

        let mysql = MySqlPoolOptions::new()
            .max_connections(self.database.max_pool_size)
            .acquire_timeout(acquire_timeout)
            .connect(&self.connections.aggregates_url)
            .await
            .map_err(|e| EtlError::from_sqlx(StoreKind::Aggregates, e))?;
        info!("connected to aggregate store");

        let aggregates = MySqlAggregateRepo::new(mysql);
        aggregates.init().await?;
        Ok((PgReadingRepo::new(pg), aggregates))
    }
}
