//! Dataset records and the IDX binary format
//!
//! This module provides the decoder for IDX files (the format MNIST ships
//! in): header parsing, layout validation, and an owned `DecodedArray`
//! produced by a pure `decode_bytes` function.

pub mod array;
pub mod decoder;
pub mod header;
pub mod layout;
pub mod record;

pub use array::DecodedArray;
pub use decoder::{decode, decode_bytes, encode, inspect, validate_file};
pub use header::{ElementType, IdxHeader, MAGIC_SIZE};
pub use layout::Layout;
pub use record::{Compression, DatasetRecord};
