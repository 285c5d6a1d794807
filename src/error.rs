//! Error types for gocache
//!
//! All modules use `CacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gocache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors that can occur in gocache
#[derive(Error, Debug)]
pub enum CacheError {
    // Protocol errors
    #[error("malformed request stream: {0}")]
    Framing(String),

    #[error("only got {got} bytes of declared {declared}")]
    BodyLength { got: usize, declared: i64 },

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("no outputID")]
    NoOutputId,

    #[error("invalid OutputID: {0}")]
    InvalidOutputId(#[from] hex::FromHexError),

    #[error("invalid {kind} {value:?}: not a lowercase hex fingerprint")]
    InvalidFingerprint { kind: &'static str, value: String },

    #[error("negative body size {0}")]
    NegativeBodySize(i64),

    #[error("not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("failed to write file to disk with right size: disk={disk}; wanted={wanted}")]
    SizeMismatch { disk: u64, wanted: i64 },

    #[error("request cancelled")]
    Cancelled,

    // Storage errors
    #[error("wrote {wrote} bytes, expected {expected}")]
    ShortWrite { wrote: u64, expected: u64 },

    #[error("{tier} cache start failed: {source}")]
    Start {
        tier: &'static str,
        #[source]
        source: Box<CacheError>,
    },

    #[error("{}", join_failures(.0))]
    Close(Vec<CacheError>),

    #[error("{tier} cache close failed: {source}")]
    TierClose {
        tier: &'static str,
        #[source]
        source: Box<CacheError>,
    },

    #[error("{0}")]
    Shared(std::sync::Arc<CacheError>),

    // Remote errors
    #[error("[{kind}] get {location} ({reason})")]
    RemoteGet {
        kind: &'static str,
        location: String,
        reason: String,
    },

    #[error("[{kind}] put failed for {location} (outputID: {output_id}, size: {size}): {reason}")]
    RemotePut {
        kind: &'static str,
        location: String,
        output_id: String,
        size: u64,
        reason: String,
    },

    #[error("Required CLI not found: {name}. {hint}")]
    CliNotFound { name: String, hint: String },

    // IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("No cache directory: set --dir or GOCACHEPROG_DIR")]
    NoCacheDir,

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_failures(failures: &[CacheError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Fatal errors end the whole protocol session instead of one request
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Framing(_) | Self::BodyLength { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Framing(_) | Self::BodyLength { .. } => {
                Some("gocache speaks GOCACHEPROG; run it via GOCACHEPROG=gocache, not by hand")
            }
            Self::NoCacheDir => Some("Pass --dir /path/to/cache"),
            Self::CliNotFound { name, .. } if name == "aws" => Some("Install the AWS CLI and run: aws configure"),
            Self::CliNotFound { name, .. } if name == "gcloud" => {
                Some("Install the Google Cloud SDK and run: gcloud auth login")
            }
            _ => None,
        }
    }
}
