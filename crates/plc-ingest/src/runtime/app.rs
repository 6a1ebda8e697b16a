use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use ingest_core::{
    BlockReader, CycleDriver, LoadError, ReadError, RunSummary, Scheduler, SimulatedController,
    TransportFault, VariableSet,
};
use ingest_io::{ConnectError, ModbusController, PgSink};
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub const EXIT_INVALID_CONFIG: u8 = 1;
pub const EXIT_STARTUP: u8 = 2;
pub const EXIT_TRANSPORT: u8 = 3;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to load variable configuration: {0}")]
    Load(#[from] LoadError),

    #[error("Failed to load controller image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Ingestion stopped: {0}")]
    Transport(#[from] TransportFault),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(ConfigError::Missing(_)) => EXIT_INVALID_CONFIG,
            AppError::Config(_)
            | AppError::Load(_)
            | AppError::Image { .. }
            | AppError::Connect(_)
            | AppError::Runtime(_) => EXIT_STARTUP,
            AppError::Transport(_) => EXIT_TRANSPORT,
        }
    }
}

enum PlcController {
    Simulated(SimulatedController),
    Modbus(ModbusController),
}

impl BlockReader for PlcController {
    async fn read_block(
        &mut self,
        block: u32,
        offset: u32,
        len: usize,
    ) -> Result<Vec<u8>, ReadError> {
        match self {
            Self::Simulated(c) => c.read_block(block, offset, len).await,
            Self::Modbus(c) => c.read_block(block, offset, len).await,
        }
    }
}

impl PlcController {
    async fn connect(config: &RuntimeConfig) -> Result<Self, AppError> {
        if let Some(path) = &config.controller_image {
            info!(path = %path.display(), "Using simulated controller image");
            let controller =
                SimulatedController::from_image(path).map_err(|source| AppError::Image {
                    path: path.clone(),
                    source,
                })?;
            return Ok(Self::Simulated(controller));
        }

        let modbus = config.modbus_config()?;
        info!(
            addr = %modbus.addr,
            rack = config.rack,
            slot = config.slot,
            block_span = modbus.block_span,
            "Connecting to controller"
        );
        Ok(Self::Modbus(ModbusController::connect(modbus).await?))
    }

    async fn disconnect(self) {
        if let Self::Modbus(c) = self {
            c.disconnect().await;
        }
    }
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    init_tracing(config.json_logs);

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)
        .and_then(|runtime| runtime.block_on(run(config)));

    match result {
        Ok(summary) => {
            info!(
                cycles = summary.cycles,
                written = summary.written,
                failed = summary.failed,
                "Run complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::from(e.exit_code())
        }
    }
}

pub async fn run(config: RuntimeConfig) -> Result<RunSummary, AppError> {
    config.validate()?;

    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let variables = VariableSet::load(&config.config)?;
    info!(
        path = %config.config.display(),
        variables = variables.len(),
        "Loaded variable configuration"
    );
    telemetry::record_configured(variables.len());

    let controller = PlcController::connect(&config).await?;
    let sink = match PgSink::connect(&config.pg_config()).await {
        Ok(sink) => sink,
        Err(e) => {
            controller.disconnect().await;
            return Err(e.into());
        }
    };

    let driver = CycleDriver::new(variables).with_failure_limit(config.max_consecutive_failures);
    let mode = config.schedule_mode();
    info!(?mode, target = %sink.target(), "Starting ingestion");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_signals(shutdown_tx));

    let mut scheduler = Scheduler::new(driver, controller, sink, mode);
    let result = scheduler
        .run(&mut shutdown_rx, telemetry::record_cycle)
        .await;

    let (controller, sink) = scheduler.into_parts();
    controller.disconnect().await;
    drop(sink);

    Ok(result?)
}

/// Turn Ctrl-C / SIGTERM into a shutdown request.
async fn forward_signals(shutdown: watch::Sender<bool>) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
        }
        _ = terminate => {}
    }

    info!("Termination signal received, finishing the current cycle");
    let _ = shutdown.send(true);
}
