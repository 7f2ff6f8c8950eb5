//! Payload compression for checkpoint storage
//!
//! Gzip round-trip over raw payload bytes. Policy (whether a payload is
//! worth compressing) lives with the caller; see
//! [`EngineConfig::compression_threshold`](crate::config::EngineConfig).

use crate::error::{EngineError, EngineResult};

/// Compress bytes using gzip
pub fn compress(raw: &[u8]) -> EngineResult<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| EngineError::storage(format!("Failed to compress payload: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| EngineError::storage(format!("Failed to finish compression: {}", e)))
}

/// Decompress gzip bytes
///
/// Corrupted input fails with `CorruptRecord`; it never panics or returns
/// partial output.
pub fn decompress(compressed: &[u8]) -> EngineResult<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(compressed);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| EngineError::corrupt(format!("Failed to decompress payload: {}", e)))?;
    Ok(raw)
}

/// Check whether a payload of this size should be compressed
pub fn exceeds_threshold(len: usize, threshold: usize) -> bool {
    len > threshold
}
