//! In-memory fetcher for tests

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use parking_lot::Mutex;

use super::fetch::{CancelToken, Fetcher};
use crate::utils::FetchError;

/// Serves registered payloads by URL and counts every call
#[derive(Default)]
pub struct MockFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
    cancel: CancelToken,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the payload served for `url`
    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().insert(url.to_string(), bytes);
    }

    /// Once cancelled, fetches write half of the payload and fail
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Total number of fetch calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock();
        match files.get(url) {
            Some(bytes) if self.cancel.is_cancelled() => {
                std::fs::write(destination, &bytes[..bytes.len() / 2])?;
                Err(FetchError::Cancelled(url.to_string()))
            }
            Some(bytes) => {
                std::fs::write(destination, bytes)?;
                Ok(bytes.len() as u64)
            }
            None => Err(FetchError::Exhausted {
                url: url.to_string(),
                attempts: 1,
                last_error: "HTTP 404".to_string(),
            }),
        }
    }
}

/// Gzip `bytes` the way the mirror serves them
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::fast());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}
