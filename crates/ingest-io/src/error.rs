use crate::tls::TlsError;
use thiserror::Error;

/// Failures while establishing a controller or sink connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to connect to controller at {addr}: {source}")]
    Controller {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Controller at {0} did not answer in time")]
    ControllerTimeout(String),

    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("Failed to connect to database {target}: {source}")]
    Database {
        target: String,
        #[source]
        source: tokio_postgres::Error,
    },
}
