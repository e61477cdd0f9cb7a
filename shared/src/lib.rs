//! Shared components and utilities for the stackprep workspace.
//!
//! This crate contains the volume primitives, file I/O, background
//! estimation, deconvolution and worker pool that the pipeline crate
//! builds on.

pub mod image_proc;
pub mod io;
pub mod test_util;
pub mod thread_pool;
pub mod volume;
pub mod volume_size;

pub use thread_pool::{JobError, JobHandle, ThreadPool, ThreadPoolError};
pub use volume_size::VolumeSize;
