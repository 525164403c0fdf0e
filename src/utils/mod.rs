//! Utility modules

pub mod error;

pub use error::{CacheError, ConfigError, DecodeError, FetchError, MldataError, Result};
