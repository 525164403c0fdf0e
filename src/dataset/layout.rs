//! Expected layout of an IDX file
//!
//! A `Layout` is what a dataset record promises about its file: the element
//! type, the rank and optionally the sizes of the dimensions. The item count
//! (outermost dimension) and the item shape (the rest) are pinned
//! separately, so a record can fix 28 x 28 images without fixing how many
//! there are. The decoder checks the file header against it before touching
//! the payload.

use super::header::{magic_for, ElementType, IdxHeader, DIM_SIZE, MAGIC_SIZE};
use crate::utils::DecodeError;

/// Layout descriptor for a binary dataset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Element type of the payload
    pub element: ElementType,

    /// Number of dimensions
    pub rank: usize,

    /// Exact item count, when the dataset fixes it
    pub items: Option<usize>,

    /// Exact sizes of the inner dimensions (e.g. 28 x 28)
    pub item_shape: Option<Vec<usize>>,
}

impl Layout {
    /// Layout with a fixed rank and unchecked dimension sizes
    pub fn new(element: ElementType, rank: usize) -> Self {
        Self {
            element,
            rank,
            items: None,
            item_shape: None,
        }
    }

    /// Layout with an exact shape, item count included
    pub fn with_shape(element: ElementType, shape: Vec<usize>) -> Self {
        let items = shape.first().copied();
        let item_shape = shape.iter().skip(1).copied().collect();
        Self {
            element,
            rank: shape.len(),
            items,
            item_shape: Some(item_shape),
        }
    }

    /// Layout of any number of items of `item_shape`
    ///
    /// An empty `item_shape` describes a 1-D file such as a label vector.
    pub fn with_item_shape(element: ElementType, item_shape: Vec<usize>) -> Self {
        Self {
            element,
            rank: item_shape.len() + 1,
            items: None,
            item_shape: Some(item_shape),
        }
    }

    /// Magic number a file with this layout must carry
    #[inline]
    pub fn magic(&self) -> u32 {
        magic_for(self.element, self.rank)
    }

    /// Header size in bytes
    #[inline]
    pub fn header_len(&self) -> usize {
        MAGIC_SIZE + DIM_SIZE * self.rank
    }

    /// Total file length when the whole shape is fixed
    pub fn expected_file_len(&self) -> Option<u64> {
        let items = self.items? as u64;
        let elements = self
            .item_shape
            .as_ref()?
            .iter()
            .try_fold(items, |acc, &d| acc.checked_mul(d as u64))?;
        elements
            .checked_mul(self.element.element_size() as u64)?
            .checked_add(self.header_len() as u64)
    }

    /// Check a parsed header against this layout
    ///
    /// The magic number must match exactly; dimension sizes are only
    /// compared where the layout fixes them.
    pub fn check_header(&self, header: &IdxHeader) -> Result<(), DecodeError> {
        if header.magic != self.magic() {
            return Err(DecodeError::Format {
                expected: self.magic(),
                actual: header.magic,
            });
        }

        let (count, inner) = match header.dims.split_first() {
            Some((&count, inner)) => (count, inner),
            None => return Ok(()),
        };
        let items_ok = self.items.map_or(true, |n| n == count);
        let inner_ok = self.item_shape.as_ref().map_or(true, |s| s[..] == *inner);
        if !(items_ok && inner_ok) {
            let mut expected = vec![self.items.unwrap_or(count)];
            expected.extend_from_slice(self.item_shape.as_deref().unwrap_or(inner));
            return Err(DecodeError::LayoutMismatch {
                expected,
                actual: header.dims.clone(),
            });
        }

        Ok(())
    }

    /// Validate a header plus the actual length of the file it came from
    pub fn check_file(&self, header: &IdxHeader, actual_len: u64) -> Result<(), DecodeError> {
        self.check_header(header)?;
        let expected = header.total_len()?;
        if expected != actual_len {
            return Err(DecodeError::Truncated {
                expected,
                actual: actual_len,
            });
        }
        Ok(())
    }
}
