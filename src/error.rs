//! Decode-pipeline error taxonomy.
//!
//! Validation and unsupported-format failures are detected before any output
//! byte is produced and returned synchronously.  Data errors may surface
//! after partial output has already reached the sink, so callers must treat
//! sink contents as provisional until a success result is observed.
//! Cancellation is kept distinct from data errors so retry and logging
//! policies can differ.

use std::io;
use thiserror::Error;

use crate::coder::MethodId;
pub use crate::bind::ValidationError;

/// The folder describes something this build cannot decode.
///
/// Structurally distinct from [`DataError`]: the container bytes may be
/// perfectly intact, we just cannot honor the declared coder configuration.
#[derive(Error, Debug)]
pub enum UnsupportedError {
    #[error("unknown coder method {0}")]
    UnknownMethod(MethodId),
    #[error("coder {coder} declares {declared_in}/{declared_out} streams but the implementation has {actual_in}/{actual_out}")]
    ArityMismatch {
        coder: usize,
        declared_in: usize,
        declared_out: usize,
        actual_in: usize,
        actual_out: usize,
    },
    /// The coder has no properties hook but the folder carries a non-empty
    /// blob.  Refusing here beats silently misdecoding.
    #[error("coder {coder} cannot accept its {len}-byte properties blob ({props})")]
    PropertiesNotSupported { coder: usize, len: usize, props: String },
    #[error("coder {coder} rejected its properties blob: {reason}")]
    PropertiesRejected { coder: usize, reason: String },
    #[error("coder {coder} requires a password but no password source is configured")]
    PasswordSourceMissing { coder: usize },
    #[error("coder {coder} rejected the supplied password: {reason}")]
    PasswordRejected { coder: usize, reason: String },
}

/// Container bytes are corrupt, truncated, or inconsistent with the folder's
/// declared sizes.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("coder {coder} failed mid-stream: {reason}")]
    CoderFailed { coder: usize, reason: String },
    #[error("main output stopped at {produced} of {expected} requested byte(s)")]
    Truncated { produced: u64, expected: u64 },
    #[error("decoded stream CRC mismatch: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("folder validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("cannot decode this folder: {0}")]
    Unsupported(#[from] UnsupportedError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    /// The progress callback requested abort.
    #[error("decode aborted by progress callback")]
    Cancelled,
    /// Allocation or thread-creation failure.  Never partially recovered;
    /// the mixer leaves no dangling worker threads behind this error.
    #[error("resource failure: {0}")]
    Resource(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
