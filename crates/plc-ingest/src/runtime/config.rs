use clap::Parser;
use ingest_core::ScheduleMode;
use ingest_io::{ModbusConfig, PgConfig, SslMode};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing parameters: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Cannot resolve controller address {addr}: {reason}")]
    ControllerAddress { addr: String, reason: String },
}

/// Process configuration. Every option can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "plc-ingest",
    version,
    about = "Periodic PLC data-block ingestion into PostgreSQL",
    after_help = "ENVIRONMENT VARIABLES:\n    RUST_LOG    Set log filter (e.g., RUST_LOG=debug,ingest_core=trace)\n\nEXAMPLES:\n    # Poll every two minutes\n    plc-ingest --plc-ip 192.168.1.10 --db-host db.local --db-user ingest --db-password ... --interval 120\n\n    # Single run against a memory image\n    plc-ingest --controller-image image.json --interval 0"
)]
pub struct RuntimeConfig {
    /// Controller address
    #[arg(long, env = "PLC_IP", default_value = "195.168.1.10")]
    pub plc_ip: String,

    /// Controller Modbus TCP port
    #[arg(long, env = "PLC_PORT", default_value_t = 502)]
    pub plc_port: u16,

    /// Controller rack (logged for S7-style addressing)
    #[arg(long, env = "PLC_RACK", default_value_t = 0)]
    pub rack: u8,

    /// Controller slot, used as the Modbus unit id
    #[arg(long, env = "PLC_SLOT", default_value_t = 0)]
    pub slot: u8,

    /// Holding registers reserved per data block
    #[arg(long, env = "PLC_BLOCK_SPAN", default_value_t = 1024)]
    pub block_span: u32,

    /// Serve reads from a JSON memory image instead of the live controller
    #[arg(long, env = "PLC_IMAGE")]
    pub controller_image: Option<PathBuf>,

    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_NAME", default_value = "postgres")]
    pub db_name: String,

    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// disable | allow | prefer | require | verify-ca | verify-full
    #[arg(long, env = "DB_SSLMODE", default_value = "require")]
    pub sslmode: String,

    /// PEM bundle of trusted roots for verify-ca / verify-full
    #[arg(long, env = "DB_CA_CERT")]
    pub db_ca_cert: Option<PathBuf>,

    #[arg(long, env = "DB_SCHEMA", default_value = "thermo")]
    pub schema: String,

    #[arg(long, env = "DB_TABLE", default_value = "sensor_valor")]
    pub table: String,

    /// Variable configuration (.json or .csv)
    #[arg(long, env = "PLC_CONFIG", default_value = "plc_config.json")]
    pub config: PathBuf,

    /// Seconds between cycles; 0 runs a single cycle
    #[arg(long, env = "INGEST_INTERVAL_SEC", default_value_t = 120)]
    pub interval: u64,

    /// Stop after this many read/write failures in a row; 0 disables
    #[arg(long, env = "INGEST_MAX_FAILURES", default_value_t = 20)]
    pub max_consecutive_failures: u32,

    /// Output logs in JSON format (for log aggregation)
    #[arg(long, env = "INGEST_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    #[arg(long, env = "INGEST_METRICS_ADDR")]
    pub metrics_addr: Option<String>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::parse()
    }

    #[cfg(test)]
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    /// Report every missing sink parameter at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, str::is_empty);
        let missing: Vec<&'static str> = [
            ("db_host", blank(&self.db_host)),
            ("db_user", blank(&self.db_user)),
            ("db_password", blank(&self.db_password)),
        ]
        .into_iter()
        .filter_map(|(name, is_missing)| is_missing.then_some(name))
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    pub fn schedule_mode(&self) -> ScheduleMode {
        ScheduleMode::from_interval_secs(self.interval)
    }

    pub fn modbus_config(&self) -> Result<ModbusConfig, ConfigError> {
        let addr = self.controller_addr()?;
        Ok(ModbusConfig::new(addr, self.slot, self.block_span))
    }

    fn controller_addr(&self) -> Result<SocketAddr, ConfigError> {
        let err = |reason: String| ConfigError::ControllerAddress {
            addr: format!("{}:{}", self.plc_ip, self.plc_port),
            reason,
        };
        (self.plc_ip.as_str(), self.plc_port)
            .to_socket_addrs()
            .map_err(|e| err(e.to_string()))?
            .next()
            .ok_or_else(|| err("no addresses found".into()))
    }

    pub fn pg_config(&self) -> PgConfig {
        PgConfig {
            host: self.db_host.clone().unwrap_or_default(),
            port: self.db_port,
            dbname: self.db_name.clone(),
            user: self.db_user.clone().unwrap_or_default(),
            password: self.db_password.clone().unwrap_or_default(),
            ssl_mode: SslMode::parse(&self.sslmode),
            ca_cert: self.db_ca_cert.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
            statement_timeout_ms: 30_000,
        }
    }
}
