//! Seams to the controller and to the measurement sink.
//!
//! Implementations never retry. An error either rejects a single operation
//! (the peer answered, so the connection can serve the next request), reports
//! that no answer arrived at all, or reports that the connection itself is
//! gone, in which case ingestion must stop.

use crate::measurement::{Measurement, PointId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("read of DB{block}.{offset} ({len} bytes) failed: {reason}")]
    Rejected {
        block: u32,
        offset: u32,
        len: usize,
        reason: String,
    },

    #[error("read of DB{block}.{offset} ({len} bytes) got no response: {reason}")]
    NoResponse {
        block: u32,
        offset: u32,
        len: usize,
        reason: String,
    },

    #[error("controller connection lost: {0}")]
    ConnectionLost(String),
}

impl ReadError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ReadError::ConnectionLost(_))
    }

    pub fn is_unanswered(&self) -> bool {
        matches!(self, ReadError::NoResponse { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("insert of point {point} failed: {reason}")]
    Rejected { point: PointId, reason: String },

    #[error("insert of point {point} got no response: {reason}")]
    NoResponse { point: PointId, reason: String },

    #[error("sink connection lost: {0}")]
    ConnectionLost(String),
}

impl WriteError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, WriteError::ConnectionLost(_))
    }

    pub fn is_unanswered(&self) -> bool {
        matches!(self, WriteError::NoResponse { .. })
    }
}

/// Raw byte-block access on an established controller connection.
#[allow(async_fn_in_trait)]
pub trait BlockReader {
    /// Read exactly `len` bytes starting at `offset` within data block `block`.
    async fn read_block(&mut self, block: u32, offset: u32, len: usize)
        -> Result<Vec<u8>, ReadError>;
}

/// Row-at-a-time writer on an established sink connection.
#[allow(async_fn_in_trait)]
pub trait MeasurementSink {
    /// Insert one row and commit it before returning.
    async fn write(&mut self, measurement: &Measurement) -> Result<(), WriteError>;
}
