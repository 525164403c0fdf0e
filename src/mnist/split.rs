//! In-memory MNIST splits and the operations on them

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use tracing::info;

use crate::dataset::header::magic_for;
use crate::dataset::{DecodedArray, ElementType};
use crate::utils::{DecodeError, MldataError, Result};

/// Which half of the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "train" | "training" => Ok(Split::Train),
            "test" | "t10k" => Ok(Split::Test),
            other => Err(format!("unknown split '{}', expected train or test", other)),
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Images and their labels, always the same length
#[derive(Debug, Clone, PartialEq)]
pub struct MnistSplit {
    split: Split,
    images: DecodedArray,
    labels: DecodedArray,
}

impl MnistSplit {
    /// Pair images with labels
    ///
    /// Labels must be a 1-D unsigned byte array with one entry per image.
    pub fn new(split: Split, images: DecodedArray, labels: DecodedArray) -> Result<Self> {
        if labels.element() != ElementType::UnsignedByte || labels.rank() != 1 {
            return Err(DecodeError::Format {
                expected: magic_for(ElementType::UnsignedByte, 1),
                actual: magic_for(labels.element(), labels.rank()),
            }
            .into());
        }
        if images.rank() == 0 || images.len() != labels.len() {
            return Err(MldataError::Consistency {
                split: split.to_string(),
                images: images.len(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            split,
            images,
            labels,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn images(&self) -> &DecodedArray {
        &self.images
    }

    pub fn labels(&self) -> &DecodedArray {
        &self.labels
    }

    pub fn into_arrays(self) -> (DecodedArray, DecodedArray) {
        (self.images, self.labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label of item `idx`
    ///
    /// # Panics
    /// Panics if `idx >= len()`
    pub fn label(&self, idx: usize) -> u8 {
        self.labels.as_bytes()[idx]
    }

    /// Occurrences of each label
    pub fn label_counts(&self) -> BTreeMap<u8, usize> {
        let mut counts = BTreeMap::new();
        for &lbl in self.labels.as_bytes() {
            *counts.entry(lbl).or_insert(0) += 1;
        }
        counts
    }

    /// Distinct labels in ascending order
    pub fn unique_labels(&self) -> Vec<u8> {
        self.label_counts().into_keys().collect()
    }

    /// Count of the rarest label (0 when empty)
    pub fn min_label_count(&self) -> usize {
        self.label_counts().values().copied().min().unwrap_or(0)
    }

    /// Shuffle images and labels with the same permutation
    pub fn shuffle(&mut self, rng: &mut fastrand::Rng) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        rng.shuffle(&mut order);
        self.apply(&order);
    }

    /// Shuffle with an RNG derived from `seed` and this split
    ///
    /// A split gets the same order from a seed whether it is shuffled on
    /// its own or as part of [`MnistData::shuffle`].
    pub fn shuffle_seeded(&mut self, seed: u64) {
        let mut rng = fastrand::Rng::with_seed(seed.wrapping_add(self.split as u64));
        self.shuffle(&mut rng);
    }

    /// Keep the first `n` items
    pub fn take(&mut self, n: usize) -> Result<()> {
        if n > self.len() {
            return Err(self.invalid_selection(n, self.len()));
        }
        let order: Vec<usize> = (0..n).collect();
        self.apply(&order);
        Ok(())
    }

    /// Keep the first `per_label` items of every label, in their current order
    ///
    /// The result holds `per_label * unique_labels().len()` items.
    pub fn balance(&mut self, per_label: usize) -> Result<()> {
        let limit = self.min_label_count();
        if per_label > limit {
            return Err(self.invalid_selection(per_label, limit));
        }

        let mut seen: BTreeMap<u8, usize> = BTreeMap::new();
        let order: Vec<usize> = (0..self.len())
            .filter(|&i| {
                let count = seen.entry(self.label(i)).or_insert(0);
                if *count < per_label {
                    *count += 1;
                    true
                } else {
                    false
                }
            })
            .collect();
        self.apply(&order);
        Ok(())
    }

    /// Collapse each image to a single row of pixels
    pub fn flatten(self) -> Self {
        Self {
            images: self.images.flatten(),
            ..self
        }
    }

    /// Write `label,pixel_0,...` rows
    ///
    /// Only flattened (2-D) images can be written.
    pub fn write_csv<W: Write>(&self, out: &mut W, header: bool) -> Result<()> {
        if self.images.rank() != 2 {
            return Err(MldataError::InvalidCsvDimensions(self.images.rank()));
        }

        let pixels = self.images.item_len();
        if header {
            write!(out, "label")?;
            for i in 0..pixels {
                write!(out, ",pixel_{}", i)?;
            }
            writeln!(out)?;
        }

        let values = self.images.to_f32();
        for idx in 0..self.len() {
            write!(out, "{}", self.label(idx))?;
            for v in &values[idx * pixels..(idx + 1) * pixels] {
                write!(out, ",{}", v)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Read rows in the format of [`write_csv`](MnistSplit::write_csv)
    ///
    /// Labels and pixels must be integers in `0..=255` and every row must
    /// have the same number of pixels. The result is flattened (N x pixels);
    /// without rows or a header the pixel count is 0.
    pub fn read_csv<R: BufRead>(split: Split, input: R, header: bool) -> Result<Self> {
        let mut width: Option<usize> = None;
        let mut labels = Vec::new();
        let mut pixels = Vec::new();

        for (idx, line) in input.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(',').collect();
            let row_pixels = fields.len() - 1;
            if idx == 0 && header {
                width = Some(row_pixels);
                continue;
            }

            match width {
                Some(w) if w != row_pixels => {
                    return Err(MldataError::InvalidCsv {
                        line: line_no,
                        reason: format!("expected {} pixels, found {}", w, row_pixels),
                    })
                }
                _ => width = Some(row_pixels),
            }

            labels.push(parse_byte(fields[0], line_no)?);
            for field in &fields[1..] {
                pixels.push(parse_byte(field, line_no)?);
            }
        }

        let n = labels.len();
        let images = DecodedArray::from_u8(vec![n, width.unwrap_or(0)], pixels)?;
        let labels = DecodedArray::from_u8(vec![n], labels)?;
        Self::new(split, images, labels)
    }

    fn apply(&mut self, order: &[usize]) {
        self.images = self.images.select(order);
        self.labels = self.labels.select(order);
    }

    fn invalid_selection(&self, requested: usize, limit: usize) -> MldataError {
        MldataError::InvalidSelection {
            split: self.split.to_string(),
            requested,
            limit,
        }
    }
}

fn parse_byte(field: &str, line: usize) -> Result<u8> {
    field.trim().parse().map_err(|e| MldataError::InvalidCsv {
        line,
        reason: format!("'{}': {}", field, e),
    })
}

/// Both splits of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct MnistData {
    pub train: MnistSplit,
    pub test: MnistSplit,
}

impl MnistData {
    pub fn get(&self, split: Split) -> &MnistSplit {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    /// Deterministically shuffle both splits from one seed
    pub fn shuffle(&mut self, seed: u64) {
        self.train.shuffle_seeded(seed);
        self.test.shuffle_seeded(seed);
    }

    /// Shrink both splits
    ///
    /// With `balanced`, `n_train` and `n_test` count items per label;
    /// otherwise they count items from the front. Nothing changes unless
    /// both requests are valid.
    pub fn reduce(&mut self, n_train: usize, n_test: usize, balanced: bool) -> Result<()> {
        let mut train = self.train.clone();
        let mut test = self.test.clone();
        if balanced {
            train.balance(n_train)?;
            test.balance(n_test)?;
        } else {
            train.take(n_train)?;
            test.take(n_test)?;
        }
        self.train = train;
        self.test = test;
        Ok(())
    }

    pub fn flatten(self) -> Self {
        Self {
            train: self.train.flatten(),
            test: self.test.flatten(),
        }
    }

    /// Write `train.csv` and `test.csv` into `dir`
    pub fn write_csv(&self, dir: &Path, header: bool) -> Result<()> {
        for split in [&self.train, &self.test] {
            if split.images().rank() != 2 {
                return Err(MldataError::InvalidCsvDimensions(split.images().rank()));
            }
        }

        fs::create_dir_all(dir)?;
        for split in [&self.train, &self.test] {
            let path = dir.join(format!("{}.csv", split.split()));
            let mut out = BufWriter::new(File::create(&path)?);
            split.write_csv(&mut out, header)?;
            out.flush()?;
            info!("Wrote {} rows to {}", split.len(), path.display());
        }
        Ok(())
    }

    /// Read `train.csv` and `test.csv` from `dir`
    pub fn read_csv(dir: &Path, header: bool) -> Result<Self> {
        let read = |split: Split| -> Result<MnistSplit> {
            let path = dir.join(format!("{}.csv", split));
            let split = MnistSplit::read_csv(split, BufReader::new(File::open(&path)?), header)?;
            info!("Read {} rows from {}", split.len(), path.display());
            Ok(split)
        };
        Ok(Self {
            train: read(Split::Train)?,
            test: read(Split::Test)?,
        })
    }
}
