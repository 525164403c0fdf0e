//! IDX decoding and encoding
//!
//! `decode_bytes` is a pure function from a byte buffer and an expected
//! layout to a `DecodedArray`. `decode` memory maps a file read-only and
//! hands the mapping to `decode_bytes`, so a dataset file is copied exactly
//! once, into the returned array.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use memmap2::Mmap;

use super::array::DecodedArray;
use super::header::{IdxHeader, MAGIC_SIZE, MAX_HEADER_SIZE};
use super::layout::Layout;
use crate::utils::DecodeError;

/// Decode an IDX buffer against the expected layout
///
/// Checks, in order: the magic number (`Format`), the total length declared
/// by the header against the buffer length (`Truncated`, or `Oversized` when
/// the declared size does not fit in 64 bits), then the declared
/// shape against the layout's fixed shape (`LayoutMismatch`). Nothing is
/// returned unless every check passes.
pub fn decode_bytes(bytes: &[u8], layout: &Layout) -> Result<DecodedArray, DecodeError> {
    if bytes.len() < MAGIC_SIZE {
        return Err(DecodeError::Truncated {
            expected: layout.header_len() as u64,
            actual: bytes.len() as u64,
        });
    }

    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != layout.magic() {
        return Err(DecodeError::Format {
            expected: layout.magic(),
            actual: magic,
        });
    }

    let header = IdxHeader::parse(bytes)?;
    let expected = header.total_len()?;
    if expected != bytes.len() as u64 {
        return Err(DecodeError::Truncated {
            expected,
            actual: bytes.len() as u64,
        });
    }
    layout.check_header(&header)?;

    let payload = bytes[header.byte_len()..].to_vec();
    DecodedArray::new(header.element, header.dims, payload)
}

/// Decode an IDX file from disk
pub fn decode<P: AsRef<Path>>(path: P, layout: &Layout) -> Result<DecodedArray, DecodeError> {
    let path = path.as_ref();
    let open_failed = |source| DecodeError::OpenFailed {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(open_failed)?;
    let len = file.metadata().map_err(open_failed)?.len();
    if len == 0 {
        return decode_bytes(&[], layout);
    }

    // SAFETY: The file is opened read-only and the mapping does not outlive
    // this function; the cache only replaces files by rename, never in place.
    let mmap = unsafe { Mmap::map(&file) }.map_err(open_failed)?;
    decode_bytes(&mmap, layout)
}

/// Read the header of a file and its length without mapping the payload
pub fn inspect<P: AsRef<Path>>(path: P) -> Result<(IdxHeader, u64), DecodeError> {
    let path = path.as_ref();
    let open_failed = |source| DecodeError::OpenFailed {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(open_failed)?;
    let len = file.metadata().map_err(open_failed)?.len();

    let mut head = Vec::with_capacity(MAX_HEADER_SIZE);
    file.take(MAX_HEADER_SIZE as u64)
        .read_to_end(&mut head)
        .map_err(open_failed)?;

    let header = IdxHeader::parse(&head)?;
    Ok((header, len))
}

/// Validate a file on disk against a layout without decoding the payload
pub fn validate_file<P: AsRef<Path>>(path: P, layout: &Layout) -> Result<IdxHeader, DecodeError> {
    let (header, len) = inspect(path)?;
    layout.check_file(&header, len)?;
    Ok(header)
}

/// Encode an array back into IDX bytes
pub fn encode(array: &DecodedArray) -> Vec<u8> {
    let header = IdxHeader::new(array.element(), array.shape().to_vec());
    let mut out = header.to_bytes();
    out.extend_from_slice(array.as_bytes());
    out
}

/// Write an array to `path` as an IDX file
pub fn write<P: AsRef<Path>>(path: P, array: &DecodedArray) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&encode(array))?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::header::ElementType;

    fn idx_3d(payload_len: usize) -> Vec<u8> {
        let mut bytes = vec![
            0x00, 0x00, 0x08, 0x03, // magic 0x00000803
            0x00, 0x00, 0x00, 0x02, // 2
            0x00, 0x00, 0x00, 0x03, // 3
            0x00, 0x00, 0x00, 0x02, // 2
        ];
        bytes.extend((0..payload_len).map(|i| i as u8 + 100));
        bytes
    }

    fn u8_layout(rank: usize) -> Layout {
        Layout::new(ElementType::UnsignedByte, rank)
    }

    #[test]
    fn test_decode_2x3x2() {
        let arr = decode_bytes(&idx_3d(12), &u8_layout(3)).unwrap();
        assert_eq!(arr.shape(), &[2, 3, 2]);
        assert_eq!(arr.as_u8().unwrap(), &(100u8..112).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_decode_one_byte_short() {
        let err = decode_bytes(&idx_3d(11), &u8_layout(3)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                expected: 28,
                actual: 27
            }
        ));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let err = decode_bytes(&idx_3d(13), &u8_layout(3)).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { expected: 28, actual: 29 }));
    }

    #[test]
    fn test_decode_wrong_magic() {
        let err = decode_bytes(&idx_3d(12), &u8_layout(1)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                expected: 0x0801,
                actual: 0x0803
            }
        ));
    }

    #[test]
    fn test_decode_too_short_for_magic() {
        assert!(matches!(
            decode_bytes(&[0x00, 0x00], &u8_layout(1)),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            decode_bytes(&[], &u8_layout(1)),
            Err(DecodeError::Truncated { actual: 0, .. })
        ));
    }

    #[test]
    fn test_decode_oversized_header() {
        let mut bytes = vec![0x00, 0x00, 0x08, 0x03];
        bytes.extend([0xFF; 12]);
        assert!(matches!(
            decode_bytes(&bytes, &u8_layout(3)),
            Err(DecodeError::Oversized { .. })
        ));

        // Declared size wraps to 16 bytes if multiplied without checks
        let wrapping = IdxHeader::new(ElementType::UnsignedByte, vec![0x8000_0000, 0x8000_0000, 4]);
        assert!(matches!(
            decode_bytes(&wrapping.to_bytes(), &u8_layout(3)),
            Err(DecodeError::Oversized { .. })
        ));

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("oversized");
        std::fs::write(&path, wrapping.to_bytes()).unwrap();
        assert!(matches!(
            validate_file(&path, &u8_layout(3)),
            Err(DecodeError::Oversized { .. })
        ));
    }

    #[test]
    fn test_zero_count_with_huge_items() {
        let header = IdxHeader::new(ElementType::UnsignedByte, vec![0, 0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF]);
        assert!(matches!(
            decode_bytes(&header.to_bytes(), &u8_layout(4)),
            Err(DecodeError::Oversized { .. })
        ));
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let layout = Layout::with_shape(ElementType::UnsignedByte, vec![2, 3, 3]);
        assert!(matches!(
            decode_bytes(&idx_3d(12), &layout),
            Err(DecodeError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let bytes = idx_3d(12);
        let a = decode_bytes(&bytes, &u8_layout(3)).unwrap();
        let b = decode_bytes(&bytes, &u8_layout(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_round_trip_random_blobs() {
        let mut rng = fastrand::Rng::with_seed(0x1D3);
        let types = [
            ElementType::UnsignedByte,
            ElementType::SignedByte,
            ElementType::Short,
            ElementType::Int,
            ElementType::Float,
            ElementType::Double,
        ];

        for _ in 0..200 {
            let element = types[rng.usize(..types.len())];
            let rank = rng.usize(0..=4);
            let shape: Vec<usize> = (0..rank).map(|_| rng.usize(0..5)).collect();
            let elements: usize = shape.iter().product();
            let payload: Vec<u8> = (0..elements * element.element_size())
                .map(|_| rng.u8(..))
                .collect();

            let mut bytes = IdxHeader::new(element, shape.clone()).to_bytes();
            bytes.extend_from_slice(&payload);

            let layout = Layout::new(element, rank);
            let arr = decode_bytes(&bytes, &layout).unwrap();
            assert_eq!(arr.shape(), &shape[..]);
            assert_eq!(encode(&arr), bytes);
        }
    }

    #[test]
    fn test_random_length_mismatch_never_decodes() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..200 {
            let shape = vec![rng.usize(1..6), rng.usize(1..6)];
            let elements: usize = shape.iter().product();
            let mut bytes = IdxHeader::new(ElementType::UnsignedByte, shape).to_bytes();
            let header_len = bytes.len();

            let mut len = rng.usize(0..elements * 2 + 2);
            if len == elements {
                len += 1;
            }
            bytes.extend(std::iter::repeat(0xAB).take(len));

            let err = decode_bytes(&bytes, &u8_layout(2)).unwrap_err();
            match err {
                DecodeError::Truncated { expected, actual } => {
                    assert_eq!(expected, (header_len + elements) as u64);
                    assert_eq!(actual, bytes.len() as u64);
                }
                other => panic!("expected Truncated, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_random_magic_alterations_rejected() {
        let mut rng = fastrand::Rng::with_seed(42);
        let original = idx_3d(12);
        for _ in 0..100 {
            let mut bytes = original.clone();
            let pos = rng.usize(0..MAGIC_SIZE);
            let flip = rng.u8(1..=255);
            bytes[pos] ^= flip;
            assert!(matches!(
                decode_bytes(&bytes, &u8_layout(3)),
                Err(DecodeError::Format { .. })
            ));
        }
    }

    #[test]
    fn test_decode_file_and_inspect() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sample-idx3-ubyte");
        std::fs::write(&path, idx_3d(12)).unwrap();

        let arr = decode(&path, &u8_layout(3)).unwrap();
        assert_eq!(arr.shape(), &[2, 3, 2]);

        let (header, len) = inspect(&path).unwrap();
        assert_eq!(header.dims, vec![2, 3, 2]);
        assert_eq!(len, 28);
        assert!(validate_file(&path, &u8_layout(3)).is_ok());

        std::fs::write(&path, idx_3d(5)).unwrap();
        assert!(matches!(
            validate_file(&path, &u8_layout(3)),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_inspect_file_shorter_than_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stub");
        std::fs::write(&path, [0x00, 0x00, 0x08, 0x03, 0x00]).unwrap();
        assert!(matches!(inspect(&path), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_decode_missing_file() {
        let result = decode("/nonexistent/file-idx1-ubyte", &u8_layout(1));
        assert!(matches!(result, Err(DecodeError::OpenFailed { .. })));
    }

    #[test]
    fn test_write_then_decode() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("labels");
        let arr = DecodedArray::from_u8(vec![4], vec![1, 2, 3, 4]).unwrap();
        write(&path, &arr).unwrap();
        assert_eq!(decode(&path, &u8_layout(1)).unwrap(), arr);
    }
}
