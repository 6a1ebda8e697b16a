use crate::hal::{MeasurementSink, WriteError};
use crate::measurement::Measurement;

/// Sink that keeps every committed row in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub rows: Vec<Measurement>,
    pub attempts: usize,
    fail_metric: Option<i32>,
    offline: bool,
}

impl RecordingSink {
    /// Reject rows for this metric id.
    pub fn failing_on(mut self, metric_id: i32) -> Self {
        self.fail_metric = Some(metric_id);
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.offline = true;
        self
    }
}

impl MeasurementSink for RecordingSink {
    async fn write(&mut self, measurement: &Measurement) -> Result<(), WriteError> {
        self.attempts += 1;
        if self.offline {
            return Err(WriteError::ConnectionLost("sink offline".into()));
        }
        if self.fail_metric == Some(measurement.point.metric_id) {
            return Err(WriteError::Rejected {
                point: measurement.point,
                reason: "foreign key violation".into(),
            });
        }
        self.rows.push(*measurement);
        Ok(())
    }
}
