use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers of a measurement point in the destination schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PointId {
    pub fundo_id: i32,
    pub location_id: i32,
    pub metric_id: i32,
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.fundo_id, self.location_id, self.metric_id)
    }
}

/// One transformed reading, stamped with the time its cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub point: PointId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    pub fn new(point: PointId, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            point,
            value,
            timestamp,
        }
    }
}
