use crate::hal::{BlockReader, ReadError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// In-memory controller serving data blocks from a fixed memory image.
///
/// Image files look like `{"blocks": {"1": [66, 72, 0, 0]}}`.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    blocks: BTreeMap<u32, Vec<u8>>,
    connected: bool,
    stalled: bool,
    reads: u64,
}

#[derive(Debug, Deserialize)]
struct MemoryImage {
    #[serde(default)]
    blocks: BTreeMap<u32, Vec<u8>>,
}

impl SimulatedController {
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            connected: true,
            stalled: false,
            reads: 0,
        }
    }

    pub fn from_image(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let image: MemoryImage = serde_json::from_reader(BufReader::new(file))?;
        let mut controller = Self::new();
        controller.blocks = image.blocks;
        Ok(controller)
    }

    pub fn with_block(mut self, block: u32, bytes: impl Into<Vec<u8>>) -> Self {
        self.set_block(block, bytes);
        self
    }

    pub fn set_block(&mut self, block: u32, bytes: impl Into<Vec<u8>>) {
        self.blocks.insert(block, bytes.into());
    }

    /// Every subsequent read reports a lost connection.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Every subsequent read goes unanswered while the link stays up.
    pub fn stall(&mut self) {
        self.stalled = true;
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockReader for SimulatedController {
    async fn read_block(
        &mut self,
        block: u32,
        offset: u32,
        len: usize,
    ) -> Result<Vec<u8>, ReadError> {
        self.reads += 1;
        if !self.connected {
            return Err(ReadError::ConnectionLost("simulated controller offline".into()));
        }

        if self.stalled {
            return Err(ReadError::NoResponse {
                block,
                offset,
                len,
                reason: "simulated controller not answering".into(),
            });
        }

        let rejected = |reason: &str| ReadError::Rejected {
            block,
            offset,
            len,
            reason: reason.to_string(),
        };
        let data = self
            .blocks
            .get(&block)
            .ok_or_else(|| rejected("no such block"))?;
        let start = offset as usize;
        data.get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| rejected("address out of range"))
    }
}
