//! Controller reader over Modbus TCP.
//!
//! Data blocks are exposed as windows of holding registers: block `N` starts
//! at register `N * block_span`, and byte `offset` of the block lives in
//! register `offset / 2` of the window, high byte first.

use crate::error::ConnectError;
use ingest_core::{BlockReader, ReadError};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ModbusConfig {
    pub addr: SocketAddr,
    pub unit_id: u8,
    /// Holding registers reserved per data block.
    pub block_span: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ModbusConfig {
    pub fn new(addr: SocketAddr, unit_id: u8, block_span: u32) -> Self {
        Self {
            addr,
            unit_id,
            block_span,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegisterWindow {
    pub start: u16,
    pub count: u16,
    /// Leading bytes to drop from the first register.
    pub skip: usize,
}

impl RegisterWindow {
    pub fn locate(block: u32, offset: u32, len: usize, span: u32) -> Option<Self> {
        let skip = (offset % 2) as usize;
        let start = block.checked_mul(span)?.checked_add(offset / 2)?;
        let count = u32::try_from((skip + len).div_ceil(2)).ok()?;
        if count == 0 || start.checked_add(count - 1)? > u16::MAX as u32 {
            return None;
        }
        Some(Self {
            start: start as u16,
            count: count as u16,
            skip,
        })
    }

    pub fn extract(&self, registers: &[u16], len: usize) -> Option<Vec<u8>> {
        let bytes: Vec<u8> = registers.iter().flat_map(|r| r.to_be_bytes()).collect();
        bytes.get(self.skip..self.skip + len).map(<[u8]>::to_vec)
    }
}

pub(crate) fn is_connection_lost(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// The request may never have reached the controller.
pub(crate) fn is_unanswered(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub struct ModbusController {
    ctx: Context,
    config: ModbusConfig,
}

impl ModbusController {
    pub async fn connect(config: ModbusConfig) -> Result<Self, ConnectError> {
        let addr = config.addr.to_string();
        let ctx = match timeout(
            config.connect_timeout,
            tcp::connect_slave(config.addr, Slave(config.unit_id)),
        )
        .await
        {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(source)) => return Err(ConnectError::Controller { addr, source }),
            Err(_) => return Err(ConnectError::ControllerTimeout(addr)),
        };
        info!(addr = %config.addr, unit_id = config.unit_id, "Connected to Modbus TCP controller");
        Ok(Self { ctx, config })
    }

    pub async fn disconnect(mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            warn!(error = %e, "Modbus disconnect failed");
        }
    }
}

impl BlockReader for ModbusController {
    async fn read_block(
        &mut self,
        block: u32,
        offset: u32,
        len: usize,
    ) -> Result<Vec<u8>, ReadError> {
        let rejected = |reason: String| ReadError::Rejected {
            block,
            offset,
            len,
            reason,
        };
        let unanswered = |reason: String| ReadError::NoResponse {
            block,
            offset,
            len,
            reason,
        };
        let window = RegisterWindow::locate(block, offset, len, self.config.block_span)
            .ok_or_else(|| rejected("address outside the holding register space".into()))?;
        debug!(block, offset, len, start = window.start, count = window.count, "Modbus read");

        let registers = match timeout(
            self.config.read_timeout,
            self.ctx.read_holding_registers(window.start, window.count),
        )
        .await
        {
            Ok(Ok(registers)) => registers,
            Ok(Err(e)) if is_connection_lost(&e) => {
                return Err(ReadError::ConnectionLost(e.to_string()))
            }
            Ok(Err(e)) if is_unanswered(&e) => return Err(unanswered(e.to_string())),
            Ok(Err(e)) => return Err(rejected(e.to_string())),
            Err(_) => {
                return Err(unanswered(format!(
                    "no reply within {:?}",
                    self.config.read_timeout
                )))
            }
        };
        window.extract(&registers, len).ok_or_else(|| {
            rejected(format!(
                "short response: {} of {} registers",
                registers.len(),
                window.count
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_offset_maps_to_register() {
        let w = RegisterWindow::locate(1, 4, 4, 1024).unwrap();
        assert_eq!(
            w,
            RegisterWindow {
                start: 1026,
                count: 2,
                skip: 0
            }
        );
    }

    #[test]
    fn odd_offset_reads_an_extra_register() {
        let w = RegisterWindow::locate(0, 3, 2, 1024).unwrap();
        assert_eq!(
            w,
            RegisterWindow {
                start: 1,
                count: 2,
                skip: 1
            }
        );
        assert_eq!(w.extract(&[0x1122, 0x3344], 2).unwrap(), vec![0x22, 0x33]);
    }

    #[test]
    fn single_byte_at_odd_offset() {
        let w = RegisterWindow::locate(2, 5, 1, 10).unwrap();
        assert_eq!(w.start, 22);
        assert_eq!(w.count, 1);
        assert_eq!(w.extract(&[0x0008], 1).unwrap(), vec![0x08]);
    }

    #[test]
    fn window_past_register_space_is_rejected() {
        assert!(RegisterWindow::locate(64, 0, 4, 1024).is_none());
        assert!(RegisterWindow::locate(63, 2046, 4, 1024).is_none());
        assert!(RegisterWindow::locate(u32::MAX, 0, 4, 1024).is_none());
    }

    #[test]
    fn short_response_yields_nothing() {
        let w = RegisterWindow::locate(0, 0, 4, 0).unwrap();
        assert!(w.extract(&[0x4248], 4).is_none());
        assert_eq!(
            w.extract(&[0x4248, 0x0000], 4).unwrap(),
            vec![0x42, 0x48, 0x00, 0x00]
        );
    }

    #[test]
    fn timeouts_are_unanswered_but_exceptions_are_answers() {
        assert!(is_unanswered(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_unanswered(&io::Error::new(
            io::ErrorKind::Other,
            "Modbus exception: illegal data address"
        )));
        assert!(!is_unanswered(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    #[test]
    fn socket_breaks_count_as_connection_loss() {
        assert!(is_connection_lost(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_connection_lost(&io::Error::from(io::ErrorKind::UnexpectedEof)));
        assert!(!is_connection_lost(&io::Error::new(
            io::ErrorKind::InvalidData,
            "Modbus exception: illegal data address"
        )));
    }
}
