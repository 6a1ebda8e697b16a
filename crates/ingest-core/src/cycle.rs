use crate::codec::{DataType, DecodeError};
use crate::descriptor::{VariableDescriptor, VariableSet};
use crate::hal::{BlockReader, MeasurementSink, ReadError, WriteError};
use crate::measurement::{Measurement, PointId};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a single variable produced no row this cycle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VariableFailure {
    #[error("{0}")]
    UnsupportedType(DecodeError),
    #[error("{0}")]
    Read(ReadError),
    #[error("{0}")]
    Decode(DecodeError),
    #[error("{0}")]
    Write(WriteError),
}

impl VariableFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            VariableFailure::UnsupportedType(_) => "unsupported_type",
            VariableFailure::Read(_) => "read",
            VariableFailure::Decode(_) => "decode",
            VariableFailure::Write(_) => "write",
        }
    }

    fn is_connection_lost(&self) -> bool {
        match self {
            VariableFailure::Read(e) => e.is_connection_lost(),
            VariableFailure::Write(e) => e.is_connection_lost(),
            _ => false,
        }
    }

    /// The request went out but nothing came back.
    fn is_unanswered(&self) -> bool {
        match self {
            VariableFailure::Read(e) => e.is_unanswered(),
            VariableFailure::Write(e) => e.is_unanswered(),
            _ => false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{name}: {failure}")]
pub struct VariableError {
    pub name: String,
    pub point: PointId,
    pub failure: VariableFailure,
}

pub type VariableOutcome = Result<Measurement, VariableError>;

/// A fault that makes further cycles pointless.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportFault {
    #[error("connection lost while processing {variable}: {failure}")]
    ConnectionLost {
        variable: String,
        failure: VariableFailure,
    },

    #[error("{failures} consecutive unanswered reads/writes, last: {last}")]
    FailureThreshold { failures: u32, last: VariableError },
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub outcomes: Vec<VariableOutcome>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.written()
    }

    pub fn failures(&self) -> impl Iterator<Item = &VariableError> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle @ {}: {} written, {} failed in {:?}",
            self.timestamp.to_rfc3339(),
            self.written(),
            self.failed(),
            self.elapsed
        )
    }
}

/// Runs one pass over every descriptor: read, decode, transform, write.
pub struct CycleDriver {
    variables: VariableSet,
    unanswered: FailureRun,
}

/// Run of unanswered reads/writes. Any answer from the peer ends the run.
#[derive(Debug, Default)]
struct FailureRun {
    limit: u32,
    count: u32,
}

impl FailureRun {
    fn reset(&mut self) {
        self.count = 0;
    }

    fn track(&mut self, err: &VariableError) -> Result<(), TransportFault> {
        match err.failure {
            ref f if f.is_unanswered() => self.count += 1,
            VariableFailure::UnsupportedType(_) => return Ok(()),
            _ => self.count = 0,
        }
        if self.limit > 0 && self.count >= self.limit {
            error!(
                "stopping ingestion after {} consecutive unanswered reads/writes",
                self.count
            );
            return Err(TransportFault::FailureThreshold {
                failures: self.count,
                last: err.clone(),
            });
        }
        Ok(())
    }
}

impl CycleDriver {
    pub fn new(variables: VariableSet) -> Self {
        Self {
            variables,
            unanswered: FailureRun::default(),
        }
    }

    /// Escalate after `limit` unanswered reads/writes in a row. `0` disables.
    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.unanswered.limit = limit;
        self
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub async fn run_cycle<C, S>(
        &mut self,
        controller: &mut C,
        sink: &mut S,
    ) -> Result<CycleReport, TransportFault>
    where
        C: BlockReader,
        S: MeasurementSink,
    {
        self.run_cycle_at(Utc::now(), controller, sink).await
    }

    /// Every measurement of the cycle carries `now`.
    pub async fn run_cycle_at<C, S>(
        &mut self,
        now: DateTime<Utc>,
        controller: &mut C,
        sink: &mut S,
    ) -> Result<CycleReport, TransportFault>
    where
        C: BlockReader,
        S: MeasurementSink,
    {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(self.variables.len());

        for var in &self.variables {
            let outcome = match ingest_one(var, now, controller, sink).await {
                Ok(measurement) => {
                    info!(
                        "OK {} -> {} = {} @ {}",
                        var.label(),
                        measurement.point,
                        measurement.value,
                        now.to_rfc3339()
                    );
                    self.unanswered.reset();
                    Ok(measurement)
                }
                Err(failure) => {
                    warn!("ERROR {}: {}", var.label(), failure);
                    if failure.is_connection_lost() {
                        error!("stopping ingestion: {}", failure);
                        return Err(TransportFault::ConnectionLost {
                            variable: var.label().to_string(),
                            failure,
                        });
                    }
                    let err = VariableError {
                        name: var.label().to_string(),
                        point: var.point,
                        failure,
                    };
                    self.unanswered.track(&err)?;
                    Err(err)
                }
            };
            outcomes.push(outcome);
        }

        Ok(CycleReport {
            timestamp: now,
            outcomes,
            elapsed: started.elapsed(),
        })
    }
}

async fn ingest_one<C, S>(
    var: &VariableDescriptor,
    now: DateTime<Utc>,
    controller: &mut C,
    sink: &mut S,
) -> Result<Measurement, VariableFailure>
where
    C: BlockReader,
    S: MeasurementSink,
{
    let data_type: DataType = var
        .type_tag
        .parse()
        .map_err(VariableFailure::UnsupportedType)?;
    let bytes = controller
        .read_block(var.block_number, var.offset, data_type.byte_len())
        .await
        .map_err(VariableFailure::Read)?;
    let raw = data_type
        .decode(&bytes, var.bit)
        .map_err(VariableFailure::Decode)?;
    let measurement = Measurement::new(var.point, var.transform.apply(raw), now);
    sink.write(&measurement)
        .await
        .map_err(VariableFailure::Write)?;
    Ok(measurement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal_sim::SimulatedController;
    use crate::testing::RecordingSink;

    fn point(metric_id: i32) -> PointId {
        PointId {
            fundo_id: 1,
            location_id: 2,
            metric_id,
        }
    }

    fn var(name: &str, offset: u32, tag: &str, metric_id: i32) -> VariableDescriptor {
        VariableDescriptor::new(1, offset, tag, point(metric_id)).with_name(name)
    }

    #[tokio::test]
    async fn real_variable_is_written_with_cycle_timestamp() {
        let mut plc = SimulatedController::new().with_block(1, vec![0x42, 0x48, 0x00, 0x00]);
        let mut sink = RecordingSink::default();
        let mut driver = CycleDriver::new(VariableSet::new(vec![var("t", 0, "REAL", 3)]));
        let now = Utc::now();

        let report = driver.run_cycle_at(now, &mut plc, &mut sink).await.unwrap();

        assert_eq!(report.written(), 1);
        assert_eq!(sink.rows, vec![Measurement::new(point(3), 50.0, now)]);
    }

    #[tokio::test]
    async fn bool_variable_follows_bit() {
        let vars = VariableSet::new(vec![var("door", 0, "BOOL", 3).with_bit(3)]);
        let mut driver = CycleDriver::new(vars);
        let mut sink = RecordingSink::default();

        let mut plc = SimulatedController::new().with_block(1, vec![0x08]);
        driver.run_cycle(&mut plc, &mut sink).await.unwrap();
        plc.set_block(1, vec![0x00]);
        driver.run_cycle(&mut plc, &mut sink).await.unwrap();

        let values: Vec<f64> = sink.rows.iter().map(|m| m.value).collect();
        assert_eq!(values, [1.0, 0.0]);
    }

    #[tokio::test]
    async fn transform_is_applied_before_write() {
        let vars = VariableSet::new(vec![var("p", 0, "INT", 3).with_transform(0.5, -10.0)]);
        let mut plc = SimulatedController::new().with_block(1, 100i16.to_be_bytes());
        let mut sink = RecordingSink::default();
        CycleDriver::new(vars)
            .run_cycle(&mut plc, &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.rows[0].value, 40.0);
    }

    #[tokio::test]
    async fn one_failing_variable_does_not_stop_the_others() {
        let vars = VariableSet::new(vec![
            var("a", 0, "WORD", 1),
            var("bad-type", 0, "FOO", 2),
            var("bad-read", 100, "DWORD", 3),
            var("bad-bit", 0, "BOOL", 4).with_bit(9),
            var("bad-write", 0, "WORD", 5),
            var("b", 2, "WORD", 6),
        ]);
        let mut plc = SimulatedController::new().with_block(1, vec![0, 7, 0, 9]);
        let mut sink = RecordingSink::default().failing_on(5);
        let mut driver = CycleDriver::new(vars);

        let report = driver.run_cycle(&mut plc, &mut sink).await.unwrap();

        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.written(), 2);
        let kinds: Vec<_> = report.failures().map(|e| e.failure.kind()).collect();
        assert_eq!(kinds, ["unsupported_type", "read", "decode", "write"]);
        let names: Vec<_> = report.failures().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["bad-type", "bad-read", "bad-bit", "bad-write"]);
        assert_eq!(sink.attempts, 3);
        let written: Vec<_> = sink.rows.iter().map(|m| (m.point.metric_id, m.value)).collect();
        assert_eq!(written, [(1, 7.0), (6, 9.0)]);
    }

    #[tokio::test]
    async fn every_measurement_shares_the_cycle_timestamp() {
        let vars = VariableSet::new((0..5).map(|i| var("v", i * 2, "INT", i as i32)).collect());
        let mut plc = SimulatedController::new().with_block(1, vec![0; 10]);
        let mut sink = RecordingSink::default();
        let mut driver = CycleDriver::new(vars);

        let report = driver.run_cycle(&mut plc, &mut sink).await.unwrap();

        assert_eq!(sink.rows.len(), 5);
        assert!(sink.rows.iter().all(|m| m.timestamp == report.timestamp));
    }

    #[tokio::test]
    async fn lost_controller_aborts_the_cycle() {
        let vars = VariableSet::new(vec![var("a", 0, "WORD", 1), var("b", 2, "WORD", 2)]);
        let mut plc = SimulatedController::new().with_block(1, vec![0; 4]);
        plc.disconnect();
        let mut sink = RecordingSink::default();

        let fault = CycleDriver::new(vars)
            .run_cycle(&mut plc, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(fault, TransportFault::ConnectionLost { ref variable, .. } if variable == "a"));
        assert_eq!(plc.reads(), 1);
        assert!(sink.rows.is_empty());
    }

    #[tokio::test]
    async fn lost_sink_aborts_the_cycle() {
        let vars = VariableSet::new(vec![var("a", 0, "WORD", 1), var("b", 2, "WORD", 2)]);
        let mut plc = SimulatedController::new().with_block(1, vec![0; 4]);
        let mut sink = RecordingSink::default().disconnected();

        let fault = CycleDriver::new(vars)
            .run_cycle(&mut plc, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(
            fault,
            TransportFault::ConnectionLost {
                failure: VariableFailure::Write(_),
                ..
            }
        ));
        assert_eq!(sink.attempts, 1);
    }

    #[tokio::test]
    async fn unanswered_reads_escalate_across_cycles() {
        let vars = VariableSet::new(vec![var("a", 0, "WORD", 1), var("b", 2, "WORD", 2)]);
        let mut plc = SimulatedController::new().with_block(1, vec![0; 4]);
        plc.stall();
        let mut sink = RecordingSink::default();
        let mut driver = CycleDriver::new(vars).with_failure_limit(3);

        assert!(driver.run_cycle(&mut plc, &mut sink).await.is_ok());
        let fault = driver.run_cycle(&mut plc, &mut sink).await.unwrap_err();
        assert!(matches!(
            fault,
            TransportFault::FailureThreshold { failures: 3, ref last } if last.name == "a"
        ));
    }

    #[tokio::test]
    async fn rejected_reads_on_a_live_link_never_escalate() {
        let vars = VariableSet::new(vec![
            VariableDescriptor::new(9, 0, "REAL", point(1)).with_name("missing0"),
            VariableDescriptor::new(9, 4, "REAL", point(2)).with_name("missing1"),
            VariableDescriptor::new(9, 8, "REAL", point(3)).with_name("missing2"),
            var("temp", 0, "REAL", 4),
        ]);
        let mut plc = SimulatedController::new().with_block(1, vec![0x42, 0x48, 0x00, 0x00]);
        let mut sink = RecordingSink::default();
        let mut driver = CycleDriver::new(vars).with_failure_limit(3);

        for _ in 0..2 {
            let report = driver.run_cycle(&mut plc, &mut sink).await.unwrap();
            assert_eq!(report.outcomes.len(), 4);
            assert_eq!(report.failed(), 3);
        }
        assert_eq!(plc.reads(), 8);
        let written: Vec<_> = sink.rows.iter().map(|m| (m.point.metric_id, m.value)).collect();
        assert_eq!(written, [(4, 50.0), (4, 50.0)]);
    }

    #[tokio::test]
    async fn an_answer_from_the_peer_ends_the_unanswered_run() {
        let vars = VariableSet::new(vec![var("a", 0, "WORD", 1), var("b", 2, "WORD", 1)]);
        let mut stalled = SimulatedController::new().with_block(1, vec![0; 4]);
        stalled.stall();
        let mut healthy = SimulatedController::new().with_block(1, vec![0; 4]);
        let mut sink = RecordingSink::default().failing_on(1);
        let mut driver = CycleDriver::new(vars).with_failure_limit(3);

        assert!(driver.run_cycle(&mut stalled, &mut sink).await.is_ok());
        let report = driver.run_cycle(&mut healthy, &mut sink).await.unwrap();
        assert_eq!(report.written(), 0);
        assert!(driver.run_cycle(&mut stalled, &mut sink).await.is_ok());

        let fault = driver.run_cycle(&mut stalled, &mut sink).await.unwrap_err();
        assert!(matches!(fault, TransportFault::FailureThreshold { failures: 3, .. }));
    }

    #[tokio::test]
    async fn success_resets_the_unanswered_run() {
        let vars = VariableSet::new(vec![var("a", 0, "WORD", 1)]);
        let mut stalled = SimulatedController::new().with_block(1, vec![0; 2]);
        stalled.stall();
        let mut healthy = SimulatedController::new().with_block(1, vec![0; 2]);
        let mut sink = RecordingSink::default();
        let mut driver = CycleDriver::new(vars).with_failure_limit(2);

        for _ in 0..3 {
            assert!(driver.run_cycle(&mut stalled, &mut sink).await.is_ok());
            assert_eq!(driver.run_cycle(&mut healthy, &mut sink).await.unwrap().written(), 1);
        }
    }

    #[tokio::test]
    async fn unsupported_types_never_escalate() {
        let vars = VariableSet::new(vec![var("x", 0, "STRING", 1)]);
        let mut plc = SimulatedController::new().with_block(1, vec![0; 4]);
        let mut sink = RecordingSink::default();
        let mut driver = CycleDriver::new(vars).with_failure_limit(1);

        for _ in 0..3 {
            let report = driver.run_cycle(&mut plc, &mut sink).await.unwrap();
            assert_eq!(report.failed(), 1);
        }
        assert_eq!(plc.reads(), 0);
    }
}
