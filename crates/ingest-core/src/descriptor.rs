//! Variable descriptors and their configuration files.
//!
//! Descriptors are loaded once at startup from a `.json` file (an object with
//! a `variables` array) or a `.csv` file (one row per variable). Both formats
//! share the same field names, including the legacy Spanish column names used
//! by existing plant configurations.

use crate::measurement::PointId;
use crate::transform::LinearTransform;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BLOCK: u32 = 1;
pub const DEFAULT_TYPE: &str = "REAL";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unsupported configuration file extension: {0}")]
    UnsupportedExtension(PathBuf),
}

/// Static definition of one monitored point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableDescriptor {
    pub name: Option<String>,
    pub block_number: u32,
    pub offset: u32,
    /// Type tag as written in the configuration; validated per cycle.
    pub type_tag: String,
    pub bit: u8,
    pub point: PointId,
    pub transform: LinearTransform,
}

impl VariableDescriptor {
    pub fn new(block_number: u32, offset: u32, type_tag: impl Into<String>, point: PointId) -> Self {
        Self {
            name: None,
            block_number,
            offset,
            type_tag: type_tag.into(),
            bit: 0,
            point,
            transform: LinearTransform::IDENTITY,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_bit(mut self, bit: u8) -> Self {
        self.bit = bit;
        self
    }

    pub fn with_transform(mut self, scale: f64, bias: f64) -> Self {
        self.transform = LinearTransform::new(scale, bias);
        self
    }

    /// Label used in log lines; empty when the entry has no name.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// One configuration entry before defaults are applied.
#[derive(Debug, Default, Deserialize)]
struct VariableEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "db", alias = "db_number")]
    block_number: Option<u32>,
    #[serde(default)]
    offset: Option<u32>,
    #[serde(default, rename = "type")]
    type_tag: Option<String>,
    #[serde(default)]
    bit: Option<u8>,
    #[serde(default, alias = "id_fundo")]
    fundo_id: Option<i32>,
    #[serde(default, alias = "id_sensorlocalizacion")]
    location_id: Option<i32>,
    #[serde(default, alias = "id_metrica")]
    metric_id: Option<i32>,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    bias: Option<f64>,
}

impl From<VariableEntry> for VariableDescriptor {
    fn from(entry: VariableEntry) -> Self {
        Self {
            name: entry.name.filter(|n| !n.is_empty()),
            // S7 data blocks are numbered from 1; 0 means "not set".
            block_number: entry
                .block_number
                .filter(|&b| b != 0)
                .unwrap_or(DEFAULT_BLOCK),
            offset: entry.offset.unwrap_or(0),
            type_tag: entry
                .type_tag
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TYPE.to_string()),
            bit: entry.bit.unwrap_or(0),
            point: PointId {
                fundo_id: entry.fundo_id.unwrap_or(0),
                location_id: entry.location_id.unwrap_or(0),
                metric_id: entry.metric_id.unwrap_or(0),
            },
            transform: LinearTransform::new(entry.scale.unwrap_or(1.0), entry.bias.unwrap_or(0.0)),
        }
    }
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
struct JsonConfig {
    #[serde(default)]
    variables: Option<Vec<VariableEntry>>,
}

/// Ordered, immutable set of descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSet {
    variables: Vec<VariableDescriptor>,
}

impl VariableSet {
    pub fn new(variables: Vec<VariableDescriptor>) -> Self {
        Self { variables }
    }

    /// Load from a `.json` or `.csv` file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Self::load_json(path),
            Some("csv") => Self::load_csv(path),
            _ => Err(LoadError::UnsupportedExtension(path.to_path_buf())),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let config: JsonConfig = serde_json::from_str(raw)?;
        Ok(Self::from_entries(config.variables.unwrap_or_default()))
    }

    fn load_json(path: &Path) -> Result<Self, LoadError> {
        let file = open(path)?;
        let config: JsonConfig =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| LoadError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_entries(config.variables.unwrap_or_default()))
    }

    fn load_csv(path: &Path) -> Result<Self, LoadError> {
        let file = open(path)?;
        let entries = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file))
            .deserialize::<VariableEntry>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| LoadError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_entries(entries))
    }

    fn from_entries(entries: Vec<VariableEntry>) -> Self {
        Self::new(entries.into_iter().map(VariableDescriptor::from).collect())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VariableDescriptor> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl<'a> IntoIterator for &'a VariableSet {
    type Item = &'a VariableDescriptor;
    type IntoIter = std::slice::Iter<'a, VariableDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
