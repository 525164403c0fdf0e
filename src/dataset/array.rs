//! Decoded numeric arrays
//!
//! `DecodedArray` owns the payload of an IDX file together with its shape.
//! Elements are kept exactly as stored in the file (big-endian for
//! multi-byte types) so that re-encoding reproduces the source bytes; typed
//! views are produced on demand.

use super::header::ElementType;
use crate::utils::DecodeError;

/// Owned, row-major array of fixed-width elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArray {
    element: ElementType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl DecodedArray {
    /// Create an array, checking that `data` holds exactly `shape` elements
    ///
    /// Shapes whose size overflows `usize`, even with a zero outer
    /// dimension, are rejected as `Oversized`.
    pub fn new(element: ElementType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, DecodeError> {
        let item_bytes = shape
            .iter()
            .skip(1)
            .try_fold(element.element_size(), |acc, &d| acc.checked_mul(d));
        let total = item_bytes.and_then(|n| n.checked_mul(shape.first().copied().unwrap_or(1)));
        let total = match total {
            Some(total) => total,
            None => return Err(DecodeError::Oversized { dims: shape }),
        };
        if total != data.len() {
            return Err(DecodeError::ShapeMismatch {
                shape,
                len: data.len(),
                element: element.as_str(),
            });
        }
        Ok(Self {
            element,
            shape,
            data,
        })
    }

    /// Create an unsigned byte array
    pub fn from_u8(shape: Vec<usize>, data: Vec<u8>) -> Result<Self, DecodeError> {
        Self::new(ElementType::UnsignedByte, shape, data)
    }

    // === Accessors ===

    #[inline]
    pub fn element(&self) -> ElementType {
        self.element
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of items along the outermost dimension
    #[inline]
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of elements
    #[inline]
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Elements per item (product of the inner dimensions)
    #[inline]
    pub fn item_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Raw payload bytes in file order
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload as unsigned bytes, if that is the element type
    pub fn as_u8(&self) -> Option<&[u8]> {
        match self.element {
            ElementType::UnsignedByte => Some(&self.data),
            _ => None,
        }
    }

    /// Raw bytes of the item at `idx`
    ///
    /// # Panics
    /// Panics if `idx >= len()`
    #[inline]
    pub fn item(&self, idx: usize) -> &[u8] {
        let stride = self.item_len() * self.element.element_size();
        &self.data[idx * stride..(idx + 1) * stride]
    }

    /// All elements converted to `f32`
    pub fn to_f32(&self) -> Vec<f32> {
        let width = self.element.element_size();
        self.data
            .chunks_exact(width)
            .map(|c| match self.element {
                ElementType::UnsignedByte => c[0] as f32,
                ElementType::SignedByte => c[0] as i8 as f32,
                ElementType::Short => i16::from_be_bytes([c[0], c[1]]) as f32,
                ElementType::Int => i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f32,
                ElementType::Float => f32::from_be_bytes([c[0], c[1], c[2], c[3]]),
                ElementType::Double => {
                    f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                }
            })
            .collect()
    }

    // === Reshaping ===

    /// Reshape without touching the payload
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, DecodeError> {
        Self::new(self.element, shape, self.data)
    }

    /// Collapse every inner dimension into one (N x rows x cols -> N x rows*cols)
    pub fn flatten(self) -> Self {
        if self.rank() <= 2 {
            return self;
        }
        let shape = vec![self.len(), self.item_len()];
        Self {
            element: self.element,
            shape,
            data: self.data,
        }
    }

    /// New array made of the items at `indices`, in that order
    ///
    /// # Panics
    /// Panics if any index is out of bounds
    pub fn select(&self, indices: &[usize]) -> Self {
        let stride = self.item_len() * self.element.element_size();
        let mut data = Vec::with_capacity(indices.len() * stride);
        for &idx in indices {
            data.extend_from_slice(self.item(idx));
        }
        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = indices.len();
        }
        Self {
            element: self.element,
            shape,
            data,
        }
    }
}
