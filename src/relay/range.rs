//! Byte-range arithmetic for chunk placement

use super::{ChunkDescriptor, RelayError};
use std::fmt;

/// Inclusive `[start, end]` offsets a chunk occupies in the complete object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Place a chunk within the object.
    ///
    /// `start = (chunk_number - 1) * nominal_chunk_size`,
    /// `end = start + actual_chunk_size - 1`. Ranges reaching past
    /// `total_size` are not rejected here; the remote endpoint owns that check.
    /// Only zero ordinals/sizes and values that overflow `u64` fail.
    pub fn for_chunk(descriptor: &ChunkDescriptor) -> Result<Self, RelayError> {
        let start = descriptor
            .chunk_number
            .checked_sub(1)
            .and_then(|index| index.checked_mul(descriptor.nominal_chunk_size))
            .ok_or_else(|| overflow(descriptor))?;
        let end = descriptor
            .actual_chunk_size
            .checked_sub(1)
            .and_then(|last| start.checked_add(last))
            .ok_or_else(|| overflow(descriptor))?;
        Ok(Self { start, end })
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A range always covers at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `true` when the range lies inside an object of `total_size` bytes
    pub fn fits_within(&self, total_size: u64) -> bool {
        self.end < total_size
    }

    /// `Content-Range` style value: `bytes {start}-{end}/{total}`
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

fn overflow(descriptor: &ChunkDescriptor) -> RelayError {
    RelayError::MalformedRequest(format!(
        "chunk {} ({} of nominal {} bytes) cannot be placed in a u64 byte range",
        descriptor.chunk_number, descriptor.actual_chunk_size, descriptor.nominal_chunk_size
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(chunk_number: u64, nominal: u64, actual: u64, total: u64) -> ChunkDescriptor {
        ChunkDescriptor {
            upload_identifier: "u1".into(),
            chunk_number,
            nominal_chunk_size: nominal,
            actual_chunk_size: actual,
            total_size: total,
        }
    }

    #[test]
    fn test_first_chunk() {
        let d = descriptor(1, 1000, 1000, 2500);
        let range = ByteRange::for_chunk(&d).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 999 });
        assert_eq!(range.content_range(d.total_size), "bytes 0-999/2500");
    }

    #[test]
    fn test_final_short_chunk() {
        let d = descriptor(3, 1000, 500, 2500);
        let range = ByteRange::for_chunk(&d).unwrap();
        assert_eq!(range.content_range(d.total_size), "bytes 2000-2499/2500");
        assert!(range.fits_within(d.total_size));
    }

    #[test]
    fn test_formula_and_length_hold() {
        for (n, nominal, actual) in [(1, 1, 1), (7, 5_245_000, 5_245_000), (1000, 3, 2)] {
            let d = descriptor(n, nominal, actual, u64::MAX);
            let range = ByteRange::for_chunk(&d).unwrap();
            assert_eq!(range.start, (n - 1) * nominal);
            assert_eq!(range.len(), actual);
            assert_eq!(ByteRange::for_chunk(&d).unwrap(), range);
        }
    }

    #[test]
    fn test_large_offsets_stay_exact() {
        // 5 TiB object, last 5 MiB chunk: no floating point drift
        let nominal = 5 * 1024 * 1024;
        let total = 5u64 * 1024 * 1024 * 1024 * 1024;
        let n = total / nominal;
        let range = ByteRange::for_chunk(&descriptor(n, nominal, nominal, total)).unwrap();
        assert_eq!(range.end, total - 1);
    }

    #[test]
    fn test_inconsistent_descriptor_is_not_rejected() {
        let d = descriptor(4, 1000, 1000, 2500);
        let range = ByteRange::for_chunk(&d).unwrap();
        assert_eq!(range.content_range(d.total_size), "bytes 3000-3999/2500");
        assert!(!range.fits_within(d.total_size));
    }

    #[test]
    fn test_overflow_is_malformed() {
        let d = descriptor(u64::MAX, u64::MAX, 1, 1);
        assert!(matches!(
            ByteRange::for_chunk(&d),
            Err(RelayError::MalformedRequest(_))
        ));
    }
}
