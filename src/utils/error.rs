//! Error types for mldata

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level library error
#[derive(Error, Debug)]
pub enum MldataError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Inconsistent {split} split: {images} images but {labels} labels")]
    Consistency {
        split: String,
        images: usize,
        labels: usize,
    },

    #[error("Invalid {split} selection of {requested} items, must be between 0 and {limit}")]
    InvalidSelection {
        split: String,
        requested: usize,
        limit: usize,
    },

    #[error("CSV export requires 2-D image data (items x pixels), got {0} dimensions")]
    InvalidCsvDimensions(usize),

    #[error("Invalid CSV at line {line}: {reason}")]
    InvalidCsv { line: usize, reason: String },

    #[error("Saved dataset '{name}' does not exist, saved datasets are [{available}]")]
    InvalidSavedDataset { name: String, available: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Settings file and option errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },

    #[error("Corrupt settings file {path}, line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Invalid value '{value}' for {option}: {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    #[error("Failed to write settings file {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },
}

/// Network fetch errors
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("Transport failure fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Gave up fetching {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Fetch of {0} was cancelled")]
    Cancelled(String),

    #[error("IO error while fetching: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Whether another attempt may succeed.
    ///
    /// Client errors (4xx other than 408/429) and cancellation are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            FetchError::Transport { .. } | FetchError::Io(_) => true,
            FetchError::InvalidUrl { .. }
            | FetchError::Exhausted { .. }
            | FetchError::Cancelled(_) => false,
        }
    }
}

/// IDX decoding errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid magic number: expected 0x{expected:08X}, got 0x{actual:08X}")]
    Format { expected: u32, actual: u32 },

    #[error("Length mismatch: header declares {expected} bytes, found {actual} bytes")]
    Truncated { expected: u64, actual: u64 },

    #[error("Shape mismatch: expected {expected:?}, file declares {actual:?}")]
    LayoutMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Dimensions {dims:?} describe more data than can be addressed")]
    Oversized { dims: Vec<usize> },

    #[error("Unsupported element type code 0x{0:02X}")]
    UnsupportedElementType(u8),

    #[error("Array shape {shape:?} does not describe {len} bytes of {element} data")]
    ShapeMismatch {
        shape: Vec<usize>,
        len: usize,
        element: &'static str,
    },

    #[error("Failed to open {path}: {source}")]
    OpenFailed { path: PathBuf, source: io::Error },
}

/// Cache population errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Fetched file {path} does not match the expected layout: {source}")]
    Layout { path: PathBuf, source: DecodeError },

    #[error("Failed to decompress {path}: {source}")]
    Decompress { path: PathBuf, source: io::Error },

    #[error("Cache IO error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub type Result<T> = std::result::Result<T, MldataError>;
