use ingest_core::CycleReport;
use ingest_io::metrics::{
    init_metrics, serve_metrics, CONFIGURED_VARIABLES, CYCLES_EXECUTED, LAST_CYCLE_SECONDS,
    LAST_CYCLE_TIMESTAMP, VARIABLES_WRITTEN, VARIABLE_FAILURES,
};
use std::thread;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

pub fn record_configured(count: usize) {
    CONFIGURED_VARIABLES.set(count as f64);
}

pub fn record_cycle(report: &CycleReport) {
    CYCLES_EXECUTED.inc();
    VARIABLES_WRITTEN.inc_by(report.written() as u64);
    for failure in report.failures() {
        VARIABLE_FAILURES
            .with_label_values(&[failure.failure.kind()])
            .inc();
    }
    LAST_CYCLE_SECONDS.set(report.elapsed.as_secs_f64());
    LAST_CYCLE_TIMESTAMP.set(report.timestamp.timestamp_millis() as f64 / 1000.0);
}
