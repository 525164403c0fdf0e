//! Local cache of dataset files
//!
//! Files live under `<base_dir>/<dataset>/raw/<local_name>`, already
//! decompressed. A file is only ever put in place by renaming a fully
//! fetched and validated temporary file from the same directory, so readers
//! never see a partial download and concurrent processes race harmlessly.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::fetch::Fetcher;
use crate::config::{ConfigStore, ValidationMode};
use crate::dataset::{validate_file, Compression, DatasetRecord};
use crate::utils::CacheError;

/// Subdirectory holding fetched files
pub const RAW_DIR: &str = "raw";

/// Subdirectory holding user-saved datasets
pub const USER_DIR: &str = "user";

/// Extension of the checksum sidecar files
const CHECKSUM_EXT: &str = "sha256";

/// State of a cached file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Missing,
    Valid,
    /// Present but unusable; the reason is for logs and `cache status`
    Invalid(String),
}

/// A record's location in the cache and its current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub state: CacheState,
}

/// Disk usage of one dataset directory
#[derive(Debug, Clone, Serialize)]
pub struct DatasetUsage {
    pub dataset: String,
    pub files: u64,
    pub bytes: u64,
}

/// Summary of everything under the base directory
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub base_dir: PathBuf,
    pub datasets: Vec<DatasetUsage>,
}

impl CacheStatus {
    pub fn total_bytes(&self) -> u64 {
        self.datasets.iter().map(|d| d.bytes).sum()
    }
}

/// Resolves dataset records to validated local files
pub struct CacheManager {
    config: Arc<ConfigStore>,
    fetcher: Box<dyn Fetcher>,
}

impl CacheManager {
    pub fn new(config: Arc<ConfigStore>, fetcher: Box<dyn Fetcher>) -> Self {
        Self { config, fetcher }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Directory of a dataset (`<base_dir>/<dataset>`)
    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.config.base_dir().join(dataset)
    }

    /// Directory of user-saved data for a dataset
    pub fn user_dir(&self, dataset: &str) -> PathBuf {
        self.dataset_dir(dataset).join(USER_DIR)
    }

    /// Cache path of a record
    pub fn local_path(&self, record: &DatasetRecord) -> PathBuf {
        self.dataset_dir(&record.dataset)
            .join(RAW_DIR)
            .join(&record.local_name)
    }

    /// Inspect a record's cache entry without fetching
    pub fn entry(&self, record: &DatasetRecord) -> CacheEntry {
        let path = self.local_path(record);
        let state = self.check(record, &path);
        CacheEntry { path, state }
    }

    /// Return the path of a valid local copy, fetching it if needed
    pub fn ensure_local(&self, record: &DatasetRecord) -> Result<PathBuf, CacheError> {
        let path = self.local_path(record);
        match self.check(record, &path) {
            CacheState::Valid => {
                info!("Using cached {} at {}", record.name(), path.display());
                return Ok(path);
            }
            CacheState::Missing => {
                info!("{} not cached, fetching from {}", record.name(), record.url);
            }
            CacheState::Invalid(reason) => {
                warn!("Cached {} is invalid ({}), fetching again", record.name(), reason);
            }
        }

        self.populate(record, &path)?;
        Ok(path)
    }

    /// Download a record again, replacing any cached copy
    ///
    /// The old file stays in place until the new one is validated.
    pub fn refetch(&self, record: &DatasetRecord) -> Result<PathBuf, CacheError> {
        let path = self.local_path(record);
        info!("Refetching {} from {}", record.name(), record.url);
        self.populate(record, &path)?;
        Ok(path)
    }

    /// Delete everything cached for a dataset, returning whether it existed
    pub fn clear(&self, dataset: &str) -> Result<bool, CacheError> {
        if dataset.is_empty() || dataset.contains(['/', '\\']) || dataset == ".." || dataset == "." {
            return Err(CacheError::Io {
                path: PathBuf::from(dataset),
                source: io::Error::new(io::ErrorKind::InvalidInput, "invalid dataset name"),
            });
        }

        let dir = self.dataset_dir(dataset);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        info!("Cleared {}", dir.display());
        Ok(true)
    }

    /// Disk usage per dataset directory
    pub fn status(&self) -> Result<CacheStatus, CacheError> {
        let base_dir = self.config.base_dir();
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheError::Io { path, source }
        };

        let mut datasets = Vec::new();
        if base_dir.is_dir() {
            for entry in fs::read_dir(&base_dir).map_err(io_err(&base_dir))? {
                let entry = entry.map_err(io_err(&base_dir))?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let (files, bytes) = dir_usage(&path).map_err(io_err(&path))?;
                datasets.push(DatasetUsage {
                    dataset: entry.file_name().to_string_lossy().into_owned(),
                    files,
                    bytes,
                });
            }
        }
        datasets.sort_by(|a, b| a.dataset.cmp(&b.dataset));

        Ok(CacheStatus { base_dir, datasets })
    }

    /// Validate whatever is at `path` against the record
    fn check(&self, record: &DatasetRecord, path: &Path) -> CacheState {
        if !path.exists() {
            return CacheState::Missing;
        }

        if let Err(e) = validate_file(path, &record.layout) {
            return CacheState::Invalid(e.to_string());
        }

        if self.config.validation_mode() == ValidationMode::Checksum {
            let expected = match fs::read_to_string(checksum_path(path)) {
                Ok(s) => s.trim().to_string(),
                Err(_) => return CacheState::Invalid("no recorded checksum".to_string()),
            };
            match sha256_file(path) {
                Ok(actual) if actual == expected => {}
                Ok(actual) => {
                    return CacheState::Invalid(format!(
                        "checksum {} does not match recorded {}",
                        actual, expected
                    ))
                }
                Err(e) => return CacheState::Invalid(e.to_string()),
            }
        }

        CacheState::Valid
    }

    /// Fetch, decompress, validate, then rename into place
    fn populate(&self, record: &DatasetRecord, path: &Path) -> Result<(), CacheError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| CacheError::Io {
            path: dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let download = NamedTempFile::new_in(dir).map_err(io_err)?;
        let bytes = self.fetcher.fetch(&record.url, download.path())?;
        debug!("Downloaded {} bytes for {}", bytes, record.name());

        let staged = match record.compression {
            Compression::None => download,
            Compression::Gzip => {
                let mut out = NamedTempFile::new_in(dir).map_err(io_err)?;
                gunzip(download.path(), out.as_file_mut()).map_err(|source| {
                    CacheError::Decompress {
                        path: PathBuf::from(&record.url),
                        source,
                    }
                })?;
                out
            }
        };

        validate_file(staged.path(), &record.layout).map_err(|source| CacheError::Layout {
            path: path.to_path_buf(),
            source,
        })?;

        let digest = match self.config.validation_mode() {
            ValidationMode::Checksum => Some(sha256_file(staged.path()).map_err(io_err)?),
            ValidationMode::Header => None,
        };

        staged.persist(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e.error,
        })?;

        let sidecar = checksum_path(path);
        match digest {
            Some(digest) => {
                let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
                writeln!(tmp, "{}", digest).map_err(io_err)?;
                tmp.persist(&sidecar).map_err(|e| io_err(e.error))?;
            }
            None => match fs::remove_file(&sidecar) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(io_err(e)),
                _ => {}
            },
        }

        info!("Cached {} at {}", record.name(), path.display());
        Ok(())
    }
}

/// Decompress a gzip file into `out`
fn gunzip(source: &Path, out: &mut File) -> io::Result<u64> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let n = io::copy(&mut decoder, out)?;
    out.sync_all()?;
    Ok(n)
}

/// Path of the checksum sidecar for a cached file
fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(CHECKSUM_EXT);
    path.with_file_name(name)
}

/// Hex SHA-256 of a file
fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// File count and total size under a directory
fn dir_usage(dir: &Path) -> io::Result<(u64, u64)> {
    let mut files = 0;
    let mut bytes = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            let (f, b) = dir_usage(&entry.path())?;
            files += f;
            bytes += b;
        } else {
            files += 1;
            bytes += meta.len();
        }
    }
    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mock::{gzip, MockFetcher};
    use crate::config::ConfigOption;
    use crate::dataset::{ElementType, IdxHeader, Layout};
    use crate::utils::{DecodeError, FetchError};
    use tempfile::TempDir;

    const URL: &str = "https://mirror.test/mnist/t10k-labels-idx1-ubyte.gz";

    fn labels_idx(n: usize) -> Vec<u8> {
        let mut bytes = IdxHeader::new(ElementType::UnsignedByte, vec![n]).to_bytes();
        bytes.extend((0..n).map(|i| (i % 10) as u8));
        bytes
    }

    fn record(count: usize) -> DatasetRecord {
        DatasetRecord {
            dataset: "mnist".to_string(),
            id: "test-labels".to_string(),
            url: URL.to_string(),
            compression: Compression::Gzip,
            local_name: "t10k-labels-idx1-ubyte".to_string(),
            layout: Layout::with_shape(ElementType::UnsignedByte, vec![count]),
        }
    }

    fn setup(dir: &TempDir) -> (Arc<MockFetcher>, CacheManager) {
        let config = ConfigStore::open(dir.path().join("mldata.cfg"));
        config
            .set(ConfigOption::BaseDir, &dir.path().join("cache").display().to_string())
            .unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let manager = CacheManager::new(Arc::new(config), Box::new(fetcher.clone()));
        (fetcher, manager)
    }

    #[test]
    fn test_ensure_local_fetches_once() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(10)));

        let first = manager.ensure_local(&record(10)).unwrap();
        let second = manager.ensure_local(&record(10)).unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fs::read(&first).unwrap(), labels_idx(10));
        assert!(first.ends_with("mnist/raw/t10k-labels-idx1-ubyte"));
    }

    #[test]
    fn test_entry_states() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(10)));

        assert_eq!(manager.entry(&record(10)).state, CacheState::Missing);
        let path = manager.ensure_local(&record(10)).unwrap();
        assert_eq!(manager.entry(&record(10)).state, CacheState::Valid);

        fs::write(&path, &labels_idx(10)[..12]).unwrap();
        assert!(matches!(
            manager.entry(&record(10)).state,
            CacheState::Invalid(_)
        ));
    }

    #[test]
    fn test_corrupt_cache_is_refetched() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(10)));

        let path = manager.ensure_local(&record(10)).unwrap();
        fs::write(&path, b"garbage").unwrap();

        let again = manager.ensure_local(&record(10)).unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(fs::read(&again).unwrap(), labels_idx(10));
    }

    #[test]
    fn test_fetched_file_with_wrong_layout() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(9)));

        let err = manager.ensure_local(&record(10)).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Layout {
                source: DecodeError::LayoutMismatch { .. },
                ..
            }
        ));

        // Nothing but the (now empty) raw directory is left behind
        let raw = manager.dataset_dir("mnist").join(RAW_DIR);
        assert_eq!(fs::read_dir(raw).unwrap().count(), 0);
    }

    #[test]
    fn test_fetch_failure_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let (_fetcher, manager) = setup(&dir);

        let err = manager.ensure_local(&record(10)).unwrap_err();
        assert!(matches!(err, CacheError::Fetch(FetchError::Exhausted { .. })));
        assert_eq!(manager.entry(&record(10)).state, CacheState::Missing);
    }

    #[test]
    fn test_cancelled_fetch_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(10)));
        fetcher.cancel_token().cancel();

        let err = manager.ensure_local(&record(10)).unwrap_err();
        assert!(matches!(err, CacheError::Fetch(FetchError::Cancelled(_))));
        assert_eq!(manager.entry(&record(10)).state, CacheState::Missing);

        // The partial download was a temporary file and is gone
        let raw = manager.dataset_dir("mnist").join(RAW_DIR);
        assert_eq!(fs::read_dir(raw).unwrap().count(), 0);
    }

    #[test]
    fn test_not_gzip_fails_to_decompress() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, labels_idx(10));

        let err = manager.ensure_local(&record(10)).unwrap_err();
        assert!(matches!(err, CacheError::Decompress { .. }));
    }

    #[test]
    fn test_uncompressed_record() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, labels_idx(10));

        let rec = DatasetRecord {
            compression: Compression::None,
            ..record(10)
        };
        let path = manager.ensure_local(&rec).unwrap();
        assert_eq!(fs::read(path).unwrap(), labels_idx(10));
    }

    #[test]
    fn test_refetch_always_downloads() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(10)));

        manager.ensure_local(&record(10)).unwrap();
        manager.refetch(&record(10)).unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_checksum_mode() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        manager
            .config()
            .set(ConfigOption::CacheValidation, "checksum")
            .unwrap();
        fetcher.serve(URL, gzip(&labels_idx(10)));

        let path = manager.ensure_local(&record(10)).unwrap();
        let sidecar = checksum_path(&path);
        assert_eq!(
            fs::read_to_string(&sidecar).unwrap().trim(),
            sha256_file(&path).unwrap()
        );
        assert_eq!(manager.entry(&record(10)).state, CacheState::Valid);

        // Same length and header, different payload
        let mut tampered = labels_idx(10);
        *tampered.last_mut().unwrap() ^= 0xFF;
        fs::write(&path, tampered).unwrap();
        assert!(matches!(
            manager.entry(&record(10)).state,
            CacheState::Invalid(_)
        ));

        manager.ensure_local(&record(10)).unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(manager.entry(&record(10)).state, CacheState::Valid);
    }

    #[test]
    fn test_checksum_mode_without_sidecar() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(10)));
        manager.ensure_local(&record(10)).unwrap();

        manager
            .config()
            .set(ConfigOption::CacheValidation, "checksum")
            .unwrap();
        assert!(matches!(
            manager.entry(&record(10)).state,
            CacheState::Invalid(_)
        ));
    }

    #[test]
    fn test_clear_and_status() {
        let dir = TempDir::new().unwrap();
        let (fetcher, manager) = setup(&dir);
        fetcher.serve(URL, gzip(&labels_idx(10)));
        manager.ensure_local(&record(10)).unwrap();

        let status = manager.status().unwrap();
        assert_eq!(status.datasets.len(), 1);
        assert_eq!(status.datasets[0].dataset, "mnist");
        assert_eq!(status.datasets[0].files, 1);
        assert_eq!(status.total_bytes(), labels_idx(10).len() as u64);

        assert!(manager.clear("mnist").unwrap());
        assert!(!manager.clear("mnist").unwrap());
        assert!(manager.status().unwrap().datasets.is_empty());
        assert!(manager.clear("../etc").is_err());
    }
}
