//! IDX file header
//!
//! Every IDX file starts with a 4-byte magic number followed by one
//! big-endian `u32` per dimension:
//!
//! ```text
//!   byte 0..2   zero
//!   byte 2      element type code
//!   byte 3      number of dimensions (rank)
//!   byte 4..    rank x u32 (big-endian), outermost dimension first
//! ```
//!
//! The payload that follows is stored row-major in big-endian element order.

use crate::utils::DecodeError;

/// Size of the magic number in bytes
pub const MAGIC_SIZE: usize = 4;

/// Size of one dimension entry in bytes
pub const DIM_SIZE: usize = 4;

/// Largest possible header (rank is a single byte)
pub const MAX_HEADER_SIZE: usize = MAGIC_SIZE + DIM_SIZE * u8::MAX as usize;

/// Element type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    UnsignedByte = 0x08,
    SignedByte = 0x09,
    Short = 0x0B,
    Int = 0x0C,
    Float = 0x0D,
    Double = 0x0E,
}

impl ElementType {
    /// Get element size in bytes
    pub fn element_size(&self) -> usize {
        match self {
            ElementType::UnsignedByte | ElementType::SignedByte => 1,
            ElementType::Short => 2,
            ElementType::Int | ElementType::Float => 4,
            ElementType::Double => 8,
        }
    }

    /// Parse from the raw type code
    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0x08 => Ok(ElementType::UnsignedByte),
            0x09 => Ok(ElementType::SignedByte),
            0x0B => Ok(ElementType::Short),
            0x0C => Ok(ElementType::Int),
            0x0D => Ok(ElementType::Float),
            0x0E => Ok(ElementType::Double),
            other => Err(DecodeError::UnsupportedElementType(other)),
        }
    }

    /// Raw type code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::UnsignedByte => "u8",
            ElementType::SignedByte => "i8",
            ElementType::Short => "i16",
            ElementType::Int => "i32",
            ElementType::Float => "f32",
            ElementType::Double => "f64",
        }
    }
}

/// Build the magic number for an element type and rank
#[inline]
pub fn magic_for(element: ElementType, rank: usize) -> u32 {
    ((element.code() as u32) << 8) | (rank as u32 & 0xFF)
}

/// Parsed IDX header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxHeader {
    /// Raw magic number
    pub magic: u32,
    /// Element type from the magic number
    pub element: ElementType,
    /// Dimension sizes, outermost first
    pub dims: Vec<usize>,
}

impl IdxHeader {
    /// Create a header for the given element type and shape
    pub fn new(element: ElementType, dims: Vec<usize>) -> Self {
        Self {
            magic: magic_for(element, dims.len()),
            element,
            dims,
        }
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Header size in bytes (magic + one u32 per dimension)
    pub fn byte_len(&self) -> usize {
        MAGIC_SIZE + DIM_SIZE * self.rank()
    }

    /// Number of elements in the payload, `None` if it overflows `u64`
    pub fn num_elements(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
    }

    /// Payload size in bytes, `None` if it overflows `u64`
    pub fn payload_len(&self) -> Option<u64> {
        self.num_elements()?
            .checked_mul(self.element.element_size() as u64)
    }

    /// Total file size declared by the header
    pub fn total_len(&self) -> Result<u64, DecodeError> {
        self.payload_len()
            .and_then(|payload| payload.checked_add(self.byte_len() as u64))
            .ok_or_else(|| DecodeError::Oversized {
                dims: self.dims.clone(),
            })
    }

    /// Parse the header at the start of `bytes`
    ///
    /// Only the header itself is validated here; payload length is checked
    /// by the decoder. A buffer too short to hold the header it announces is
    /// reported as truncated.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < MAGIC_SIZE {
            return Err(DecodeError::Truncated {
                expected: MAGIC_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = read_u32_be(&bytes[..MAGIC_SIZE]);
        if magic & 0xFFFF_0000 != 0 {
            return Err(DecodeError::Format {
                expected: magic & 0x0000_FFFF,
                actual: magic,
            });
        }

        let element = ElementType::from_code(bytes[2])?;
        let rank = bytes[3] as usize;
        let header_len = MAGIC_SIZE + DIM_SIZE * rank;
        if bytes.len() < header_len {
            return Err(DecodeError::Truncated {
                expected: header_len as u64,
                actual: bytes.len() as u64,
            });
        }

        let dims = bytes[MAGIC_SIZE..header_len]
            .chunks_exact(DIM_SIZE)
            .map(|chunk| read_u32_be(chunk) as usize)
            .collect();

        Ok(Self {
            magic,
            element,
            dims,
        })
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        out.extend_from_slice(&self.magic.to_be_bytes());
        for &dim in &self.dims {
            out.extend_from_slice(&(dim as u32).to_be_bytes());
        }
        out
    }
}

#[inline(always)]
fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
