// Domain models

mod aggregate;
mod reading;

pub use aggregate::{AggregateRecord, BucketKey};
pub use reading::Reading;

use std::collections::BTreeMap;

/// Output of one aggregation pass, keyed and ordered by (device_id, hour).
pub type AggregateBatch = BTreeMap<BucketKey, AggregateRecord>;
