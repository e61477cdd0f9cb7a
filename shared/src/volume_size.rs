//! Volume dimensions and size utilities

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Volume dimensions structure
///
/// Represents the width, height and depth of an image stack.
/// Provides convenience methods for creating arrays and converting
/// to and from ndarray shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeSize {
    /// Volume width in voxels (X)
    pub width: usize,
    /// Volume height in voxels (Y)
    pub height: usize,
    /// Volume depth in slices (Z)
    pub depth: usize,
}

impl VolumeSize {
    /// Create a new VolumeSize
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Read the size of an existing volume
    ///
    /// Arrays are stored as (depth, height, width) so that a Z slice is a
    /// contiguous row-major image.
    pub fn of<T>(volume: &Array3<T>) -> Self {
        Self::from_shape(volume.dim())
    }

    /// Create from an ndarray shape tuple (depth, height, width)
    pub fn from_shape(shape: (usize, usize, usize)) -> Self {
        Self {
            width: shape.2,
            height: shape.1,
            depth: shape.0,
        }
    }

    /// Shape tuple (depth, height, width) for ndarray constructors
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.depth, self.height, self.width)
    }

    /// Create a zero-filled array with this size
    pub fn empty_array<T>(&self) -> Array3<T>
    where
        T: Clone + num_traits::Zero,
    {
        Array3::zeros(self.shape())
    }

    /// Get total number of voxels
    pub fn voxel_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// True if any extent is zero
    pub fn is_empty(&self) -> bool {
        self.voxel_count() == 0
    }

    /// True if a window of the given size fits inside this volume
    pub fn contains(&self, window: &VolumeSize) -> bool {
        window.width <= self.width && window.height <= self.height && window.depth <= self.depth
    }
}

impl From<(usize, usize, usize)> for VolumeSize {
    /// Build from a (width, height, depth) tuple
    fn from(dimensions: (usize, usize, usize)) -> Self {
        Self::new(dimensions.0, dimensions.1, dimensions.2)
    }
}

impl fmt::Display for VolumeSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}
