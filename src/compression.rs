//! Compression backends for Data Blocks (spec §4.8, §4.9, §6).
//!
//! LZ4 is backed by `lz4_flex` (pure Rust, no C toolchain dependency);
//! ZSTD is backed by the `zstd` crate, the same choice
//! `examples/tsturzl-sled`'s `pagecache` crate makes available behind its
//! optional `zstd` feature.

use snafu::Snafu;

use crate::error::{Error, ErrorKind};

/// Selects the compression algorithm used for a file's Data Blocks.
/// Persisted as a single byte in the file header (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    #[default]
    None = 0,
    Lz4 = 1,
    Zstd = 2,
}

impl CompressionAlgorithm {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            2 => Some(CompressionAlgorithm::Zstd),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Snafu)]
pub enum CompressionError {
    #[snafu(display("failed to compress {size} bytes with {algorithm:?}: {reason}"))]
    Compress {
        algorithm: CompressionAlgorithm,
        size: usize,
        reason: String,
    },
    #[snafu(display("failed to decompress with {algorithm:?}: {reason}"))]
    Decompress {
        algorithm: CompressionAlgorithm,
        reason: String,
    },
}

impl From<CompressionError> for Error {
    fn from(e: CompressionError) -> Self {
        Error::internal(e.to_string())
    }
}

/// Worst-case output size for a compressed buffer of `uncompressed_len`
/// bytes, used to size the Data Writer's compression workspace (spec §4.8).
pub fn worst_case_compressed_size(alg: CompressionAlgorithm, uncompressed_len: usize) -> usize {
    match alg {
        CompressionAlgorithm::None => uncompressed_len,
        CompressionAlgorithm::Lz4 => lz4_flex::block::get_maximum_output_size(uncompressed_len),
        CompressionAlgorithm::Zstd => {
            zstd::zstd_safe::compress_bound(uncompressed_len)
        }
    }
}

/// Compresses `input` into `output`, returning the number of bytes written.
/// `output` must have at least `worst_case_compressed_size` capacity.
pub fn compress(
    alg: CompressionAlgorithm,
    input: &[u8],
    output: &mut Vec<u8>,
) -> Result<usize, CompressionError> {
    output.clear();
    match alg {
        CompressionAlgorithm::None => {
            output.extend_from_slice(input);
            Ok(input.len())
        }
        CompressionAlgorithm::Lz4 => {
            let compressed = lz4_flex::block::compress(input);
            output.extend_from_slice(&compressed);
            Ok(compressed.len())
        }
        CompressionAlgorithm::Zstd => {
            let compressed = zstd::bulk::compress(input, 3).map_err(|e| CompressionError::Compress {
                algorithm: alg,
                size: input.len(),
                reason: e.to_string(),
            })?;
            output.extend_from_slice(&compressed);
            Ok(compressed.len())
        }
    }
}

/// Decompresses `input` (whose decompressed size is known to be
/// `uncompressed_len`, since Data Block headers record it) into `output`.
pub fn decompress(
    alg: CompressionAlgorithm,
    input: &[u8],
    uncompressed_len: usize,
    output: &mut Vec<u8>,
) -> Result<(), CompressionError> {
    output.clear();
    match alg {
        CompressionAlgorithm::None => {
            output.extend_from_slice(input);
            Ok(())
        }
        CompressionAlgorithm::Lz4 => {
            let decompressed = lz4_flex::block::decompress(input, uncompressed_len).map_err(|e| {
                CompressionError::Decompress {
                    algorithm: alg,
                    reason: e.to_string(),
                }
            })?;
            output.extend_from_slice(&decompressed);
            Ok(())
        }
        CompressionAlgorithm::Zstd => {
            let decompressed = zstd::bulk::decompress(input, uncompressed_len).map_err(|e| {
                CompressionError::Decompress {
                    algorithm: alg,
                    reason: e.to_string(),
                }
            })?;
            output.extend_from_slice(&decompressed);
            Ok(())
        }
    }
}

impl From<CompressionError> for ErrorKind {
    fn from(_: CompressionError) -> Self {
        ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trips() {
        let input = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut compressed = Vec::new();
        compress(CompressionAlgorithm::Lz4, &input, &mut compressed).unwrap();
        assert!(compressed.len() < input.len());

        let mut decompressed = Vec::new();
        decompress(CompressionAlgorithm::Lz4, &compressed, input.len(), &mut decompressed).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn zstd_round_trips() {
        let input = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut compressed = Vec::new();
        compress(CompressionAlgorithm::Zstd, &input, &mut compressed).unwrap();
        assert!(compressed.len() < input.len());

        let mut decompressed = Vec::new();
        decompress(CompressionAlgorithm::Zstd, &compressed, input.len(), &mut decompressed).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn none_is_passthrough() {
        let input = b"uncompressed payload".to_vec();
        let mut out = Vec::new();
        compress(CompressionAlgorithm::None, &input, &mut out).unwrap();
        assert_eq!(out, input);
    }
}
