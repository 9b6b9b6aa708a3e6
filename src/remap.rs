//! Path remap table
//!
//! Maps a canonical request path to an aliased path under a mirror's base
//! path. Tables are built once per reload from a raw source and never
//! modified afterwards. Lookup is exact match on the path with leading
//! slashes removed.

use crate::assets;
use crate::error::{RedirectorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Supported remap source formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapFormat {
    /// Pipe-delimited `canonical|target` rows
    DelimitedText,
    /// JSON release asset list
    AssetList,
}

impl RemapFormat {
    /// Infer the format from a file extension (`.csv` or `.json`)
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Ok(RemapFormat::DelimitedText),
            Some("json") => Ok(RemapFormat::AssetList),
            _ => Err(RedirectorError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemapFormat::DelimitedText => "delimited_text",
            RemapFormat::AssetList => "asset_list",
        }
    }
}

/// Raw remap bytes plus their declared format
#[derive(Debug, Clone)]
pub struct RemapSource {
    pub bytes: Vec<u8>,
    pub format: RemapFormat,
}

impl RemapSource {
    pub fn new(bytes: impl Into<Vec<u8>>, format: RemapFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }
}

/// Result of loading a remap source
#[derive(Debug, Clone)]
pub struct RemapLoad {
    pub table: RemapTable,
    /// Records dropped without failing the load
    pub skipped: usize,
}

/// Immutable canonical path to target path mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RemapTable {
    entries: BTreeMap<String, String>,
}

impl RemapTable {
    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// Build a table from raw bytes in the given format
    ///
    /// Malformed input fails the whole load; no partial table is returned.
    pub fn load(source: &RemapSource) -> Result<RemapLoad> {
        let load = match source.format {
            RemapFormat::DelimitedText => RemapLoad {
                table: load_delimited(&source.bytes)?,
                skipped: 0,
            },
            RemapFormat::AssetList => {
                let (entries, skipped) = assets::load_asset_list(&source.bytes)?;
                RemapLoad {
                    table: RemapTable::from_entries(entries),
                    skipped,
                }
            }
        };

        debug!(
            "Loaded {} remap entries from {} source ({} skipped)",
            load.table.len(),
            source.format.as_str(),
            load.skipped
        );
        Ok(load)
    }

    /// Look up the alias for a request path
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.entries.get(normalize(path)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

/// Strip leading slashes to get the canonical lookup key
pub fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Parse pipe-delimited rows; every row must have exactly two columns
fn load_delimited(bytes: &[u8]) -> Result<RemapTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut entries = BTreeMap::new();

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let record = record
            .map_err(|e| RedirectorError::RemapParse(format!("row {}: {}", row, e)))?;

        if record.len() != 2 {
            return Err(RedirectorError::RemapParse(format!(
                "row {}: expected 2 columns, got {}",
                row,
                record.len()
            )));
        }

        entries.insert(
            normalize(&record[0]).to_string(),
            normalize(&record[1]).to_string(),
        );
    }

    Ok(RemapTable::from_entries(entries))
}
