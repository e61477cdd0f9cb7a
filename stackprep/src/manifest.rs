//! JSON-lines manifest of prepared images.
//!
//! One row is appended per fully processed image, so a manifest can be
//! tailed while a batch runs and survives an interrupted batch.

use crate::algo::{Quaternion, Roi};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode manifest row: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bookkeeping for one prepared image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub source: PathBuf,
    pub mask: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub roi: Roi,
    /// Background level subtracted from each channel
    pub background: Vec<f32>,
    pub rotations: Vec<Quaternion>,
    /// Artifact file names, indexed like `rotations`
    pub outputs: Vec<String>,
    pub mask_outputs: Vec<String>,
}

/// Append `row` as one JSON line, creating the file if needed
pub fn append_row(path: impl AsRef<Path>, row: &ManifestRow) -> Result<(), ManifestError> {
    let line = serde_json::to_string(row)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Read every row back
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<ManifestRow>, ManifestError> {
    fs::read_to_string(path)?
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).map_err(|source| ManifestError::Json { line: i + 1, source })
        })
        .collect()
}
