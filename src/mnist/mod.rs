//! MNIST handwritten digits
//!
//! [`Mnist`] ties the cache and the IDX decoder together: it knows the four
//! files of the dataset, makes sure each is cached, decodes them and checks
//! that every split has one label per image.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mldata::cache::{CacheManager, HttpFetcher};
//! use mldata::config::ConfigStore;
//! use mldata::mnist::{Mnist, Split};
//!
//! let config = Arc::new(ConfigStore::open_default());
//! let fetcher = HttpFetcher::from_config(&config);
//! let mnist = Mnist::new(CacheManager::new(config, Box::new(fetcher)));
//! let (images, labels) = mnist.load(Split::Train)?;
//! assert_eq!(images.shape(), &[60000, 28, 28]);
//! assert_eq!(labels.len(), 60000);
//! # Ok::<(), mldata::utils::MldataError>(())
//! ```

pub mod split;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::cache::CacheManager;
use crate::dataset::{self, inspect, Compression, DatasetRecord, DecodedArray, ElementType, Layout};
use crate::utils::{MldataError, Result};

pub use split::{MnistData, MnistSplit, Split};

/// Cache directory name of the dataset
pub const DATASET: &str = "mnist";

/// Image height and width
pub const IMAGE_SIDE: usize = 28;

/// Image and label records of one split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecords {
    pub images: DatasetRecord,
    pub labels: DatasetRecord,
}

impl SplitRecords {
    /// The standard MNIST files of `split` served from `mirror`
    ///
    /// Images must be 28 x 28 bytes and labels a byte vector. Item counts
    /// are left open so that mismatched files reach the image/label count
    /// check in [`MnistSplit::new`].
    pub fn mnist(mirror: &str, split: Split) -> Self {
        let prefix = match split {
            Split::Train => "train",
            Split::Test => "t10k",
        };

        let record = |kind: &str, idx_name: &str, item_shape: Vec<usize>| {
            let local_name = format!("{}-{}-{}-ubyte", prefix, kind, idx_name);
            DatasetRecord {
                dataset: DATASET.to_string(),
                id: format!("{}-{}", split, kind),
                url: join_url(mirror, &format!("{}.gz", local_name)),
                compression: Compression::Gzip,
                local_name,
                layout: Layout::with_item_shape(ElementType::UnsignedByte, item_shape),
            }
        };

        Self {
            images: record("images", "idx3", vec![IMAGE_SIDE, IMAGE_SIDE]),
            labels: record("labels", "idx1", vec![]),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &DatasetRecord> {
        [&self.images, &self.labels].into_iter()
    }
}

fn join_url(base: &str, file: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, file)
    } else {
        format!("{}/{}", base, file)
    }
}

/// Names of the files inside a saved dataset directory
const SAVED_FILES: [(Split, &str, &str); 2] = [
    (Split::Train, "train-images.idx", "train-labels.idx"),
    (Split::Test, "test-images.idx", "test-labels.idx"),
];

/// MNIST loader
pub struct Mnist {
    cache: CacheManager,
    train: SplitRecords,
    test: SplitRecords,
}

impl Mnist {
    /// Loader for the standard files on the configured mirror
    pub fn new(cache: CacheManager) -> Self {
        let mirror = cache.config().mirror();
        let train = SplitRecords::mnist(&mirror, Split::Train);
        let test = SplitRecords::mnist(&mirror, Split::Test);
        Self::with_records(cache, train, test)
    }

    /// Loader for any image/label IDX pairs with the MNIST structure
    pub fn with_records(cache: CacheManager, train: SplitRecords, test: SplitRecords) -> Self {
        Self { cache, train, test }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn records(&self, split: Split) -> &SplitRecords {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    /// Images and labels of a split
    ///
    /// Both files are cached (fetched if needed) and decoded before the
    /// image and label counts are compared; nothing is returned unless all
    /// of it succeeds.
    pub fn load(&self, split: Split) -> Result<(DecodedArray, DecodedArray)> {
        Ok(self.load_split(split)?.into_arrays())
    }

    /// Like [`load`](Mnist::load), keeping the pair together
    pub fn load_split(&self, split: Split) -> Result<MnistSplit> {
        let records = self.records(split);

        let images_path = self.cache.ensure_local(&records.images)?;
        let labels_path = self.cache.ensure_local(&records.labels)?;

        let images = dataset::decode(&images_path, &records.images.layout)?;
        let labels = dataset::decode(&labels_path, &records.labels.layout)?;
        debug!(
            "Decoded {} split: images {:?}, labels {:?}",
            split,
            images.shape(),
            labels.shape()
        );

        MnistSplit::new(split, images, labels)
    }

    /// Both splits
    pub fn load_all(&self) -> Result<MnistData> {
        Ok(MnistData {
            train: self.load_split(Split::Train)?,
            test: self.load_split(Split::Test)?,
        })
    }

    /// Download every file again
    pub fn refetch(&self) -> Result<()> {
        for record in self.train.iter().chain(self.test.iter()) {
            self.cache.refetch(record)?;
        }
        Ok(())
    }

    // === User saves ===

    fn saved_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(self.invalid_saved(name));
        }
        Ok(self.cache.user_dir(DATASET).join(name))
    }

    /// Store both splits under `name`, replacing an earlier save
    ///
    /// The files are written to a hidden staging directory that is renamed
    /// into place once complete; an earlier save under the same name is
    /// moved aside first and removed afterwards.
    pub fn save(&self, name: &str, data: &MnistData) -> Result<PathBuf> {
        let dir = self.saved_dir(name)?;
        let user_dir = self.cache.user_dir(DATASET);
        fs::create_dir_all(&user_dir)?;

        let staging = hidden_tempdir(&user_dir)?;
        for (split, images_file, labels_file) in SAVED_FILES {
            let part = data.get(split);
            dataset::decoder::write(staging.path().join(images_file), part.images())?;
            dataset::decoder::write(staging.path().join(labels_file), part.labels())?;
        }

        let previous = hidden_tempdir(&user_dir)?;
        if dir.exists() {
            debug!("Replacing saved dataset '{}'", name);
            fs::rename(&dir, previous.path().join(name))?;
        }
        if let Err(e) = fs::rename(staging.path(), &dir) {
            let _ = fs::rename(previous.path().join(name), &dir);
            return Err(e.into());
        }

        info!("Saved dataset '{}' to {}", name, dir.display());
        Ok(dir)
    }

    /// Names of all saved datasets, sorted
    pub fn saved(&self) -> Result<Vec<String>> {
        let dir = self.cache.user_dir(DATASET);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load a dataset stored with [`save`](Mnist::save)
    pub fn load_saved(&self, name: &str) -> Result<MnistData> {
        let dir = self.saved_dir(name)?;
        if !dir.is_dir() {
            return Err(self.invalid_saved(name));
        }

        let mut splits = Vec::with_capacity(SAVED_FILES.len());
        for (split, images_file, labels_file) in SAVED_FILES {
            let images = decode_any(dir.join(images_file))?;
            let labels = decode_any(dir.join(labels_file))?;
            splits.push(MnistSplit::new(split, images, labels)?);
        }

        let test = splits.pop();
        let train = splits.pop();
        match (train, test) {
            (Some(train), Some(test)) => Ok(MnistData { train, test }),
            _ => Err(self.invalid_saved(name)),
        }
    }

    fn invalid_saved(&self, name: &str) -> MldataError {
        MldataError::InvalidSavedDataset {
            name: name.to_string(),
            available: self.saved().unwrap_or_default().join(", "),
        }
    }
}

/// Temporary directory inside `parent` that `saved` does not list
fn hidden_tempdir(parent: &Path) -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix(".save").tempdir_in(parent)?)
}

/// Decode a file using the layout its own header declares
fn decode_any(path: PathBuf) -> Result<DecodedArray> {
    let (header, _) = inspect(&path)?;
    let layout = Layout::new(header.element, header.rank());
    Ok(dataset::decode(&path, &layout)?)
}
