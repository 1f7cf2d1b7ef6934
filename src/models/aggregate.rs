// Hourly aggregate: one row per (device_id, hour) in the aggregate store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite key of a bucket and of an aggregate row. Orders by device, then hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketKey {
    pub device_id: i32,
    /// Start of the hour (minutes, seconds and sub-seconds are zero).
    pub hour: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub device_id: i32,
    pub hour: DateTime<Utc>,
    pub max_temperature: f64,
    pub data_points: i64,
    /// Kilometers, summed over consecutive in-hour reading pairs.
    pub total_distance: f64,
}

impl AggregateRecord {
    pub fn key(&self) -> BucketKey {
        BucketKey {
            device_id: self.device_id,
            hour: self.hour,
        }
    }
}
