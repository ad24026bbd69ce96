//! Unified error handling for kawana.
//!
//! Protocol errors never reach the wire; they are logged and the connection
//! is closed without a reply. Snapshot and backup errors are logged by their
//! background loops. The only fatal errors are initialization failures.

use std::io;
use thiserror::Error;

/// Errors from the snapshot codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file header carries an encoding version this build cannot read.
    #[error("wrong version kdb: found {found}, expected {expected}")]
    WrongVersion { found: u32, expected: u32 },

    /// EOF landed inside a record instead of on a record boundary.
    #[error("truncated record: {len} of {expected} bytes")]
    Truncated { len: usize, expected: usize },
}

/// Errors from the data store: startup load and snapshot persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Per-connection protocol errors. Logged, never written to the client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command: {0:#04x}")]
    UnknownCommand(u8),

    #[error("read error: {0}")]
    Io(#[from] io::Error),

    #[error("read deadline expired")]
    Deadline(#[from] tokio::time::error::Elapsed),
}

/// Errors from the S3 backup path.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup enabled but s3 bucket not configured")]
    MissingBucket,

    #[error("s3 bucket probe failed: {0}")]
    Probe(String),

    #[error("failed to read snapshot for backup: {0}")]
    Read(String),

    #[error("s3 upload failed: {0}")]
    Upload(String),
}
