pub mod error;
pub mod metrics;
pub mod modbus;
pub mod postgres;
pub mod tls;

pub use error::ConnectError;
pub use metrics::{init_metrics, serve_metrics};
pub use modbus::{ModbusConfig, ModbusController};
pub use postgres::{PgConfig, PgSink};
pub use tls::{client_config, SslMode, TlsError};
