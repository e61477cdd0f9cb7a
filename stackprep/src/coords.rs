//! Landmark coordinate files.
//!
//! One landmark per line as `x, y, z` in voxel units (commas or whitespace
//! separate the values). Blank lines and lines starting with `#` are
//! ignored. A file with no landmarks is an error.

use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading landmark coordinates
#[derive(Error, Debug)]
pub enum CoordError {
    #[error("failed to read coordinate file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected 3 values, found {found}")]
    Arity { line: usize, found: usize },
    #[error("line {line}: '{value}' is not a number")]
    Parse { line: usize, value: String },
    #[error("coordinate file holds no landmarks")]
    NoLandmarks,
}

/// A landmark position in voxel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Parse landmark text
pub fn parse_landmarks(text: &str) -> Result<Vec<Landmark>, CoordError> {
    let mut landmarks = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() != 3 {
            return Err(CoordError::Arity {
                line: i + 1,
                found: fields.len(),
            });
        }

        let mut values = [0.0f64; 3];
        for (value, field) in values.iter_mut().zip(&fields) {
            *value = field.parse().map_err(|_| CoordError::Parse {
                line: i + 1,
                value: field.to_string(),
            })?;
        }

        landmarks.push(Landmark {
            x: values[0],
            y: values[1],
            z: values[2],
        });
    }

    if landmarks.is_empty() {
        return Err(CoordError::NoLandmarks);
    }
    Ok(landmarks)
}

/// Read and parse a landmark file
pub fn load_landmarks(path: impl AsRef<Path>) -> Result<Vec<Landmark>, CoordError> {
    parse_landmarks(&fs::read_to_string(path)?)
}

/// Mean position (x, y, z) of the landmarks
pub fn centroid(landmarks: &[Landmark]) -> Option<(f64, f64, f64)> {
    if landmarks.is_empty() {
        return None;
    }
    let n = landmarks.len() as f64;
    let (x, y, z) = landmarks
        .iter()
        .fold((0.0, 0.0, 0.0), |acc, l| (acc.0 + l.x, acc.1 + l.y, acc.2 + l.z));
    Some((x / n, y / n, z / n))
}
