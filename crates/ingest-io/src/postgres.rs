use crate::error::ConnectError;
use crate::tls::{self, SslMode};
use ingest_core::{Measurement, MeasurementSink, WriteError};
use std::path::PathBuf;
use std::time::Duration;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Statement};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: SslMode,
    pub ca_cert: Option<PathBuf>,
    pub schema: String,
    pub table: String,
    pub statement_timeout_ms: u64,
}

impl PgConfig {
    /// Fully qualified target table, validated as plain identifiers.
    pub fn target(&self) -> Result<String, ConnectError> {
        for ident in [&self.schema, &self.table] {
            if !is_identifier(ident) {
                return Err(ConnectError::InvalidIdentifier(ident.clone()));
            }
        }
        Ok(format!("{}.{}", self.schema, self.table))
    }
}

pub(crate) fn is_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn insert_sql(target: &str) -> String {
    format!(
        "INSERT INTO {target} (id_fundo, id_sensorlocalizacion, id_metrica, valor, fecha) \
         VALUES ($1, $2, $3, $4, $5)"
    )
}

/// Writes one committed row per measurement.
pub struct PgSink {
    client: Client,
    insert: Statement,
    target: String,
}

impl PgSink {
    pub async fn connect(config: &PgConfig) -> Result<Self, ConnectError> {
        let target = config.target()?;
        let db_err = |source| ConnectError::Database {
            target: format!("{}:{}/{}", config.host, config.port, config.dbname),
            source,
        };

        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.dbname)
            .user(&config.user)
            .password(&config.password)
            .application_name("plc-ingest")
            .connect_timeout(Duration::from_secs(30));

        let client = match tls::client_config(config.ssl_mode, config.ca_cert.as_deref())? {
            None => {
                pg.ssl_mode(PgSslMode::Disable);
                let (client, connection) = pg.connect(NoTls).await.map_err(db_err)?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!(error = %e, "Database connection closed");
                    }
                });
                client
            }
            Some(tls_config) => {
                pg.ssl_mode(if config.ssl_mode.requires_tls() {
                    PgSslMode::Require
                } else {
                    PgSslMode::Prefer
                });
                let (client, connection) = pg
                    .connect(MakeRustlsConnect::new(tls_config))
                    .await
                    .map_err(db_err)?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!(error = %e, "Database connection closed");
                    }
                });
                client
            }
        };

        let timeout_sql = format!("SET statement_timeout TO {}", config.statement_timeout_ms);
        if let Err(e) = client.batch_execute(&timeout_sql).await {
            warn!(error = %e, "Failed to set statement_timeout");
        }

        let insert = client
            .prepare_typed(
                &insert_sql(&target),
                &[
                    Type::INT4,
                    Type::INT4,
                    Type::INT4,
                    Type::FLOAT8,
                    Type::TIMESTAMPTZ,
                ],
            )
            .await
            .map_err(db_err)?;

        info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            sslmode = ?config.ssl_mode,
            target = %target,
            "Connected to database"
        );
        Ok(Self {
            client,
            insert,
            target,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

async fn insert_committed(
    client: &mut Client,
    insert: &Statement,
    m: &Measurement,
) -> Result<(), tokio_postgres::Error> {
    let tx = client.transaction().await?;
    tx.execute(
        insert,
        &[
            &m.point.fundo_id,
            &m.point.location_id,
            &m.point.metric_id,
            &m.value,
            &m.timestamp,
        ],
    )
    .await?;
    tx.commit().await
}

impl MeasurementSink for PgSink {
    async fn write(&mut self, measurement: &Measurement) -> Result<(), WriteError> {
        let result = insert_committed(&mut self.client, &self.insert, measurement).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_closed() || self.client.is_closed() => {
                Err(WriteError::ConnectionLost(e.to_string()))
            }
            Err(e) if e.as_db_error().is_some() => Err(WriteError::Rejected {
                point: measurement.point,
                reason: e.to_string(),
            }),
            Err(e) => Err(WriteError::NoResponse {
                point: measurement.point,
                reason: e.to_string(),
            }),
        }
    }
}
