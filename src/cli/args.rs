//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// gocache - external build cache for the Go toolchain
///
/// Speaks the GOCACHEPROG protocol on stdin/stdout. Outputs are stored in a
/// local directory and, optionally, mirrored to an S3 or GCS bucket.
#[derive(Parser, Debug)]
#[command(name = "gocache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Cache directory (defaults to the user cache directory)
    #[arg(long, env = "GOCACHEPROG_DIR")]
    pub dir: Option<PathBuf>,

    /// Amazon S3 bucket to mirror the cache to
    #[arg(long, env = "GOCACHEPROG_S3_BUCKET", conflicts_with = "gcs_bucket")]
    pub s3_bucket: Option<String>,

    /// Google Cloud Storage bucket to mirror the cache to
    #[arg(long, env = "GOCACHEPROG_GCS_BUCKET")]
    pub gcs_bucket: Option<String>,

    /// Cache key separating incompatible remote caches
    #[arg(long, env = "GOCACHEPROG_KEY")]
    pub key: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "GOCACHEPROG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug); logs go to stderr
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
