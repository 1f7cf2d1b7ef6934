// Shared test helpers: reading constructors and in-memory store fakes with failure injection.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use telemetry_etl::error::{EtlError, StoreKind};
use telemetry_etl::models::{AggregateBatch, AggregateRecord, BucketKey, Reading};
use telemetry_etl::runner::Backoff;
use telemetry_etl::store::{AggregateStore, ReadingStore, StoreConnector};

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    rfc3339.parse().unwrap()
}

pub fn reading(device_id: i32, time: &str, lat: f64, lon: f64, temperature: f64) -> Reading {
    Reading {
        device_id,
        time: at(time),
        latitude: lat,
        longitude: lon,
        temperature,
    }
}

/// 1° of longitude on the equator, km.
pub const ONE_DEGREE_KM: f64 = 111.194_926_644_558_73;

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// The three-reading scenario for device 1 in the 10:00 hour.
pub fn scenario_readings() -> Vec<Reading> {
    vec![
        reading(1, "2024-03-01T10:05:00Z", 0.0, 0.0, 20.0),
        reading(1, "2024-03-01T10:30:00Z", 0.0, 1.0, 25.0),
        reading(1, "2024-03-01T10:50:00Z", 0.0, 2.0, 22.0),
    ]
}

#[derive(Default)]
struct ReadingInner {
    readings: Mutex<Vec<Reading>>,
    fail_reads: AtomicU32,
}

/// Reading store fake. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryReadingStore {
    inner: Arc<ReadingInner>,
}

impl MemoryReadingStore {
    pub fn with(readings: Vec<Reading>) -> Self {
        let store = Self::default();
        store.extend(readings);
        store
    }

    pub fn extend(&self, readings: impl IntoIterator<Item = Reading>) {
        self.inner.readings.lock().unwrap().extend(readings);
    }

    /// The next `n` reads deliver every row, then fail with a connection reset.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.fail_reads.store(n, Ordering::SeqCst);
    }
}

impl ReadingStore for MemoryReadingStore {
    fn fetch_readings_grouped_by_hour(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<Reading, EtlError>> {
        let mut rows: Vec<Result<Reading, EtlError>> = self
            .inner
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| since.is_none_or(|s| r.time >= s))
            .cloned()
            .map(Ok)
            .collect();
        if take_failure(&self.inner.fail_reads) {
            rows.push(Err(EtlError::connectivity(
                StoreKind::Readings,
                "connection reset by peer",
            )));
        }
        stream::iter(rows).boxed()
    }
}

#[derive(Default)]
struct AggregateInner {
    rows: Mutex<BTreeMap<BucketKey, AggregateRecord>>,
    fail_writes: AtomicU32,
    write_calls: AtomicU32,
}

/// Aggregate store fake with all-or-nothing batch upserts. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryAggregateStore {
    inner: Arc<AggregateInner>,
}

impl MemoryAggregateStore {
    pub fn rows(&self) -> Vec<AggregateRecord> {
        self.inner.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, device_id: i32, hour: &str) -> Option<AggregateRecord> {
        let key = BucketKey {
            device_id,
            hour: at(hour),
        };
        self.inner.rows.lock().unwrap().get(&key).cloned()
    }

    pub fn seed(&self, record: AggregateRecord) {
        self.inner.rows.lock().unwrap().insert(record.key(), record);
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.inner.fail_writes.store(n, Ordering::SeqCst);
    }

    pub fn write_calls(&self) -> u32 {
        self.inner.write_calls.load(Ordering::SeqCst)
    }
}

impl AggregateStore for MemoryAggregateStore {
    async fn upsert_aggregates(&self, batch: &AggregateBatch) -> Result<usize, EtlError> {
        self.inner.write_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.fail_writes) {
            return Err(EtlError::connectivity(StoreKind::Aggregates, "server has gone away"));
        }
        let mut rows = self.inner.rows.lock().unwrap();
        for record in batch.values() {
            rows.insert(record.key(), record.clone());
        }
        Ok(batch.len())
    }
}

/// Hands out the shared fakes; can refuse the first N connects or fail as misconfigured.
#[derive(Default)]
pub struct MemoryConnector {
    pub readings: MemoryReadingStore,
    pub aggregates: MemoryAggregateStore,
    fail_connects: AtomicU32,
    reject_connects: AtomicU32,
    misconfigured: AtomicBool,
    connect_calls: AtomicU32,
}

impl MemoryConnector {
    pub fn new(readings: MemoryReadingStore, aggregates: MemoryAggregateStore) -> Self {
        Self {
            readings,
            aggregates,
            ..Default::default()
        }
    }

    pub fn fail_next_connects(self, n: u32) -> Self {
        self.fail_connects.store(n, Ordering::SeqCst);
        self
    }

    /// Next `n` connects fail with a non-connectivity server error (e.g. schema setup rejected).
    pub fn reject_next_connects(self, n: u32) -> Self {
        self.reject_connects.store(n, Ordering::SeqCst);
        self
    }

    pub fn misconfigured(self) -> Self {
        self.misconfigured.store(true, Ordering::SeqCst);
        self
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MemoryConnector {
    type Readings = MemoryReadingStore;
    type Aggregates = MemoryAggregateStore;

    async fn connect(&self) -> Result<(MemoryReadingStore, MemoryAggregateStore), EtlError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.misconfigured.load(Ordering::SeqCst) {
            return Err(EtlError::Config("invalid port number".into()));
        }
        if take_failure(&self.fail_connects) {
            return Err(EtlError::connectivity(StoreKind::Readings, "connection refused"));
        }
        if take_failure(&self.reject_connects) {
            return Err(EtlError::Data(
                "aggregate store: CREATE command denied to user 'etl'".into(),
            ));
        }
        Ok((self.readings.clone(), self.aggregates.clone()))
    }
}

/// Backoff that records every attempt number it was asked about.
#[derive(Clone)]
pub struct RecordingBackoff {
    pub delay: Duration,
    pub attempts: Arc<Mutex<Vec<u32>>>,
}

impl RecordingBackoff {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            attempts: Arc::default(),
        }
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Backoff for RecordingBackoff {
    fn delay(&mut self, attempt: u32) -> Duration {
        self.attempts.lock().unwrap().push(attempt);
        self.delay
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
