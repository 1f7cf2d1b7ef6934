// Hourly windowing: partition readings into (device_id, hour) buckets, then reduce each
// bucket to max temperature, reading count and consecutive-pair travel distance.
// Pure computation; store access lives in the repos.

use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

use crate::error::EtlError;
use crate::geo;
use crate::models::{AggregateBatch, AggregateRecord, BucketKey, Reading};

/// Truncate a timestamp to the start of its hour (UTC).
pub fn truncate_to_hour(time: DateTime<Utc>) -> Result<DateTime<Utc>, EtlError> {
    time.duration_trunc(TimeDelta::hours(1))
        .map_err(|e| EtlError::Data(format!("cannot truncate {time} to hour: {e}")))
}

/// Readings of one device within one calendar hour, ordered by time ascending.
#[derive(Debug, Clone)]
pub struct HourBucket {
    pub key: BucketKey,
    pub readings: Vec<Reading>,
}

impl HourBucket {
    /// Reduce the bucket to its aggregate row. Buckets are built from readings, so never empty.
    pub fn summarize(&self) -> AggregateRecord {
        let max_temperature = self
            .readings
            .iter()
            .map(|r| r.temperature)
            .fold(f64::NEG_INFINITY, f64::max);
        let total_distance = self
            .readings
            .windows(2)
            .map(|pair| {
                geo::distance_km(
                    pair[0].latitude,
                    pair[0].longitude,
                    pair[1].latitude,
                    pair[1].longitude,
                )
            })
            .sum();

        AggregateRecord {
            device_id: self.key.device_id,
            hour: self.key.hour,
            max_temperature,
            data_points: self.readings.len() as i64,
            total_distance,
        }
    }
}

/// Incremental bucketer: readings are pushed as they stream out of the reading store.
#[derive(Debug, Default)]
pub struct WindowAggregator {
    buckets: BTreeMap<BucketKey, Vec<Reading>>,
    readings_seen: usize,
}

impl WindowAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reading to its bucket. Malformed readings fail the whole pass.
    pub fn push(&mut self, reading: Reading) -> Result<(), EtlError> {
        validate(&reading)?;
        let key = BucketKey {
            device_id: reading.device_id,
            hour: truncate_to_hour(reading.time)?,
        };
        self.buckets.entry(key).or_default().push(reading);
        self.readings_seen += 1;
        Ok(())
    }

    pub fn readings_seen(&self) -> usize {
        self.readings_seen
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Buckets ordered by key. Within a bucket readings are sorted by time; the sort is
    /// stable so equal timestamps keep arrival order.
    pub fn into_buckets(self) -> Vec<HourBucket> {
        self.buckets
            .into_iter()
            .map(|(key, mut readings)| {
                readings.sort_by_key(|r| r.time);
                HourBucket { key, readings }
            })
            .collect()
    }

    pub fn finish(self) -> AggregateBatch {
        self.into_buckets()
            .into_iter()
            .map(|b| (b.key, b.summarize()))
            .collect()
    }
}

/// One-shot form of [`WindowAggregator`] over an in-memory sequence.
pub fn aggregate(readings: impl IntoIterator<Item = Reading>) -> Result<AggregateBatch, EtlError> {
    let mut agg = WindowAggregator::new();
    for r in readings {
        agg.push(r)?;
    }
    Ok(agg.finish())
}

fn validate(r: &Reading) -> Result<(), EtlError> {
    if !r.temperature.is_finite() {
        return Err(EtlError::Data(format!(
            "device {} at {}: non-finite temperature {}",
            r.device_id, r.time, r.temperature
        )));
    }
    if !r.latitude.is_finite() || !(-90.0..=90.0).contains(&r.latitude) {
        return Err(EtlError::Data(format!(
            "device {} at {}: latitude {} out of range",
            r.device_id, r.time, r.latitude
        )));
    }
    if !r.longitude.is_finite() || !(-180.0..=180.0).contains(&r.longitude) {
        return Err(EtlError::Data(format!(
            "device {} at {}: longitude {} out of range",
            r.device_id, r.time, r.longitude
        )));
    }
    Ok(())
}
