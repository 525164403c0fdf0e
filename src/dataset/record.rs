//! Dataset records
//!
//! A record is the static description of one remote file: where it lives,
//! how it is compressed and what layout its decoded contents must have.

use super::layout::Layout;

/// Compression of the remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

/// Static descriptor of a named dataset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    /// Dataset the file belongs to (cache subdirectory), e.g. "mnist"
    pub dataset: String,

    /// File identifier, e.g. "train-images"
    pub id: String,

    /// Remote location
    pub url: String,

    /// Compression of the remote file
    pub compression: Compression,

    /// Name of the decompressed file inside the cache
    pub local_name: String,

    /// Expected layout of the decompressed file
    pub layout: Layout,
}

impl DatasetRecord {
    /// Qualified name used in logs, e.g. "mnist/train-images"
    pub fn name(&self) -> String {
        format!("{}/{}", self.dataset, self.id)
    }
}
