// One pass: stream readings -> hourly buckets -> upsert aggregates.
// A pass either commits every record or none; failures propagate to the runner untouched.

use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::TryStreamExt;
use tracing::{debug, info, instrument};

use crate::aggregation::{WindowAggregator, truncate_to_hour};
use crate::error::EtlError;
use crate::store::{AggregateStore, ReadingStore};

/// What one successful pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub readings: usize,
    pub buckets: usize,
    pub rows_written: usize,
    pub elapsed: Duration,
}

/// Lower bound for the reading query. Rounded down to the hour so the oldest bucket is
/// read in full; a partial bucket would overwrite a complete stored row.
pub fn window_start(now: DateTime<Utc>, lookback: Option<TimeDelta>) -> Result<Option<DateTime<Utc>>, EtlError> {
    lookback.map(|d| truncate_to_hour(now - d)).transpose()
}

/// Runs one read-aggregate-write pass. Used by the runner loop and directly by tests.
#[instrument(skip_all, fields(lookback_hours = lookback.map(|d| d.num_hours())))]
pub async fn run_one_pass<R, A>(
    readings: &R,
    aggregates: &A,
    lookback: Option<TimeDelta>,
) -> Result<PassReport, EtlError>
where
    R: ReadingStore,
    A: AggregateStore,
{
    let started = Instant::now();
    let since = window_start(Utc::now(), lookback)?;

    let mut aggregator = WindowAggregator::new();
    let mut stream = readings.fetch_readings_grouped_by_hour(since);
    while let Some(reading) = stream.try_next().await? {
        aggregator.push(reading)?;
    }
    drop(stream);

    let readings_count = aggregator.readings_seen();
    let bucket_count = aggregator.bucket_count();
    let batch = aggregator.finish();
    for record in batch.values() {
        debug!(
            device_id = record.device_id,
            hour = %record.hour,
            max_temperature = record.max_temperature,
            data_points = record.data_points,
            total_distance_km = record.total_distance,
            "aggregate"
        );
    }

    let rows_written = aggregates.upsert_aggregates(&batch).await?;
    let report = PassReport {
        readings: readings_count,
        buckets: bucket_count,
        rows_written,
        elapsed: started.elapsed(),
    };
    info!(
        readings = report.readings,
        buckets = report.buckets,
        rows_written = report.rows_written,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "pass complete"
    );
    Ok(report)
}
