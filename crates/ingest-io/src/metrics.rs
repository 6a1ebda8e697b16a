//! Prometheus metrics for the ingestion loop.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Cycle Metrics
// ============================================================================

/// Total ingestion cycles completed
pub static CYCLES_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "plc_ingest_cycles_executed_total",
        "Total ingestion cycles completed",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Wall time of the last completed cycle
pub static LAST_CYCLE_SECONDS: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "plc_ingest_last_cycle_duration_seconds",
        "Duration of the last completed cycle in seconds",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Capture time of the last completed cycle
pub static LAST_CYCLE_TIMESTAMP: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "plc_ingest_last_cycle_timestamp_seconds",
        "Unix capture time of the last completed cycle",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Variable Metrics
// ============================================================================

/// Measurements committed to the sink
pub static VARIABLES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "plc_ingest_variables_written_total",
        "Measurements committed to the sink",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Per-variable failures by stage
pub static VARIABLE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "plc_ingest_variable_failures_total",
            "Variables that produced no row, by failing stage",
        ),
        &["kind"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Variables in the loaded configuration
pub static CONFIGURED_VARIABLES: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "plc_ingest_configured_variables",
        "Variables in the loaded configuration",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub const FAILURE_KINDS: [&str; 4] = ["unsupported_type", "read", "decode", "write"];

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => match encode_metrics() {
                    Ok(buffer) => {
                        let mut response = Response::from_data(buffer);
                        if let Ok(header) = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        ) {
                            response = response.with_header(header);
                        }
                        response
                    }
                    Err(e) => {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        Response::from_string("Internal Server Error").with_status_code(500)
                    }
                },
                "/health" => Response::from_string("OK"),
                // Ready once a full cycle has completed
                "/ready" if CYCLES_EXECUTED.get() > 0 => Response::from_string("Ready"),
                "/ready" => Response::from_string("Not Ready").with_status_code(503),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    })
}

fn encode_metrics() -> prometheus::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = CYCLES_EXECUTED.get();
    let _ = LAST_CYCLE_SECONDS.get();
    let _ = LAST_CYCLE_TIMESTAMP.get();
    let _ = VARIABLES_WRITTEN.get();
    let _ = CONFIGURED_VARIABLES.get();
    for kind in FAILURE_KINDS {
        let _ = VARIABLE_FAILURES.with_label_values(&[kind]).get();
    }
}
