use crate::cycle::{CycleDriver, CycleReport, TransportFault};
use crate::hal::{BlockReader, MeasurementSink};
use log::info;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Run a single cycle and return.
    Once,
    /// Run cycles forever, sleeping `interval` after each one finishes.
    Periodic(Duration),
}

impl ScheduleMode {
    /// `0` means a single run.
    pub fn from_interval_secs(secs: u64) -> Self {
        if secs == 0 {
            ScheduleMode::Once
        } else {
            ScheduleMode::Periodic(Duration::from_secs(secs))
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub written: u64,
    pub failed: u64,
}

impl RunSummary {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.written += report.written() as u64;
        self.failed += report.failed() as u64;
    }
}

/// Owns both connections for the lifetime of the run and lends them to the
/// cycle driver one cycle at a time.
pub struct Scheduler<C: BlockReader, S: MeasurementSink> {
    driver: CycleDriver,
    controller: C,
    sink: S,
    mode: ScheduleMode,
    summary: RunSummary,
}

impl<C: BlockReader, S: MeasurementSink> Scheduler<C, S> {
    pub fn new(driver: CycleDriver, controller: C, sink: S, mode: ScheduleMode) -> Self {
        Self {
            driver,
            controller,
            sink,
            mode,
            summary: RunSummary::default(),
        }
    }

    /// Run until the mode completes, `shutdown` turns true, or a transport
    /// fault occurs. A cycle in progress always runs to completion.
    pub async fn run<F>(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        mut on_cycle: F,
    ) -> Result<RunSummary, TransportFault>
    where
        F: FnMut(&CycleReport),
    {
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, not starting another cycle");
                break;
            }

            let report = self
                .driver
                .run_cycle(&mut self.controller, &mut self.sink)
                .await?;
            info!("{}", report);
            self.summary.record(&report);
            on_cycle(&report);

            let ScheduleMode::Periodic(interval) = self.mode else {
                break;
            };
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop_requested(shutdown) => {
                    info!("shutdown requested during sleep");
                    break;
                }
            }
        }
        Ok(self.summary.clone())
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Hand the connections back for teardown.
    pub fn into_parts(self) -> (C, S) {
        (self.controller, self.sink)
    }
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender can never request a stop.
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
