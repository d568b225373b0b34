//! Error types for the CFS codec and harness.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while packing or unpacking container streams.
///
/// These are structural failures and abort the whole operation. Bus-level
/// anomalies (out-of-bounds port or device access) are deliberately not
/// errors; they are reported through the diagnostic sink while the run
/// keeps going.
#[derive(Error, Debug)]
pub enum CfsError {
    #[error("Filename too long: {0}")]
    NameTooLong(String),

    #[error("File too big: {path} ({size} bytes)")]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("Only regular files or directories are supported: {0}")]
    UnsupportedEntryKind(PathBuf),

    #[error("Malformed container header at offset {0}")]
    MalformedHeader(usize),

    #[error("Container stream is empty or malformed")]
    EmptyOrMalformedStream,

    #[error("Container stream truncated in entry {0}")]
    TruncatedStream(String),

    #[error("Couldn't create directory: {0}")]
    DirectoryCreateFailure(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CFS operations.
pub type CfsResult<T> = Result<T, CfsError>;
