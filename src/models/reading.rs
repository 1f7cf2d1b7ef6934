// Raw telemetry row as produced upstream; never written by the ETL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub device_id: i32,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
}
