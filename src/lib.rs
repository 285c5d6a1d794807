//! gocache - GOCACHEPROG build cache helper
//!
//! Serves the Go toolchain's external cache protocol from a local directory,
//! optionally mirrored to an S3 or GCS bucket.

pub mod cli;
pub mod config;
pub mod error;
pub mod protocol;
pub mod storage;

pub use error::{CacheError, CacheResult};
