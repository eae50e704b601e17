//! Payload Compression
//!
//! LZ4 compression for large payloads, transparent to callers. Payloads below
//! the configured threshold, and payloads that do not shrink when encoded,
//! are stored raw. A failed decode is reported as an error which the engine
//! converts into a miss; corruption never reaches the caller.

use bytes::Bytes;
use tracing::warn;

use crate::error::{Error, Result};

/// Default compression threshold (1 KiB)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Reversible payload transform
pub trait Codec: Send + Sync {
    /// Codec identifier used in error reporting
    fn name(&self) -> &'static str;

    /// Encode raw bytes
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decode previously encoded bytes
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through codec
pub struct NoopCodec;

impl Codec for NoopCodec {
    fn name(&self) -> &'static str {
        "none"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 block codec (size-prepended, so decode needs no external length)
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(data, None, true).map_err(|e| Error::CompressionFailed {
            algorithm: self.name().into(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: self.name().into(),
            reason: e.to_string(),
        })
    }
}

/// Threshold-gated compression applied by every tier on write
pub struct Compression {
    codec: Lz4Codec,
    threshold_bytes: usize,
}

impl Compression {
    /// Create with the given size threshold
    pub fn new(threshold_bytes: usize) -> Self {
        Self {
            codec: Lz4Codec,
            threshold_bytes,
        }
    }

    /// Size threshold in bytes
    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }

    /// Whether a payload of `len` bytes should be compressed
    #[inline]
    pub fn should_compress(&self, len: usize) -> bool {
        len > self.threshold_bytes
    }

    /// Encode a payload for storage.
    ///
    /// Returns `(stored_bytes, compressed)`. Falls back to raw storage when
    /// the payload is below the threshold, when encoding fails, or when the
    /// encoded form is not smaller than the input.
    pub fn maybe_encode(&self, data: &Bytes) -> (Bytes, bool) {
        if !self.should_compress(data.len()) {
            return (data.clone(), false);
        }

        match self.codec.encode(data) {
            Ok(encoded) if encoded.len() < data.len() => (Bytes::from(encoded), true),
            Ok(_) => (data.clone(), false),
            Err(e) => {
                warn!(error = %e, "compression failed, storing raw");
                (data.clone(), false)
            }
        }
    }

    /// Decode a stored payload
    pub fn decode(&self, data: &[u8]) -> Result<Bytes> {
        let decoded = self.codec.decode(data)?;
        Ok(Bytes::from(decoded))
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn compressible(len: usize) -> Bytes {
        // Repetitive payload, compresses well
        Bytes::from(b"abcdefgh".repeat(len / 8 + 1))
    }

    #[test]
    fn test_lz4_roundtrip() {
        let codec = Lz4Codec;
        let data = b"repetitive data repetitive data repetitive data repetitive data";

        let encoded = codec.encode(data).unwrap();
        assert!(encoded.len() < data.len());

        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_noop_roundtrip() {
        let codec = NoopCodec;
        let data = b"anything";
        assert_eq!(codec.decode(&codec.encode(data).unwrap()).unwrap(), data);
    }

    #[test]
    fn test_small_payload_stored_raw() {
        let compression = Compression::default();
        let data = Bytes::from_static(b"tiny");

        let (stored, compressed) = compression.maybe_encode(&data);
        assert!(!compressed);
        assert_eq!(stored, data);
    }

    #[test]
    fn test_large_payload_compressed() {
        let compression = Compression::default();
        let data = compressible(4096);

        let (stored, compressed) = compression.maybe_encode(&data);
        assert!(compressed);
        assert!(stored.len() < data.len());

        let decoded = compression.decode(&stored).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_incompressible_payload_stored_raw() {
        let compression = Compression::new(16);
        // Pseudo-random bytes that LZ4 cannot shrink
        let data: Bytes = (0..2048u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
            .collect::<Vec<u8>>()
            .into();

        let (stored, compressed) = compression.maybe_encode(&data);
        if !compressed {
            assert_eq!(stored, data);
        } else {
            assert!(stored.len() < data.len());
        }
    }

    #[test]
    fn test_threshold_boundary() {
        let compression = Compression::new(100);
        assert!(!compression.should_compress(99));
        assert!(!compression.should_compress(100));
        assert!(compression.should_compress(101));
    }

    #[test]
    fn test_corrupt_decode_fails() {
        let compression = Compression::default();
        let result = compression.decode(b"\xff\xff\xff\xffnot lz4 data");
        assert!(result.is_err());
    }
}
