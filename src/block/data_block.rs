//! On-disk framing for a Data Block: the common block header, an `(odid,
//! session_id)` pair identifying the writer state it came from, the
//! compression method and uncompressed size needed to invert it, and the
//! (possibly compressed) payload produced by [`super::data_writer::DataWriter`]
//! (spec §4.8, §4.9, grounded on `fds_file_bdata`).

use bytes::{Buf, BufMut};

use crate::block::{BlockFlags, BlockHeader, BlockType, BLOCK_HEADER_SIZE};
use crate::compression::{self, CompressionAlgorithm};
use crate::error::{Error, Result};

/// Size of the Data Block body's fixed prefix (everything before the
/// payload): odid, session id, compression method, uncompressed length.
const PREFIX_SIZE: usize = 4 + 2 + 1 + 4;

pub struct DecodedDataBlock {
    pub odid: u32,
    pub session_id: u16,
    pub payload: Vec<u8>,
}

/// Peeked identity of a Data Block, without paying for decompression.
pub struct DataBlockIdentity {
    pub odid: u32,
    pub session_id: u16,
}

/// Compresses `raw` (if `compression` requests it) and wraps it in a
/// complete Data Block, header included.
pub fn encode(odid: u32, session_id: u16, compression: CompressionAlgorithm, raw: &[u8]) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    compression::compress(compression, raw, &mut payload)?;

    let flags = if compression == CompressionAlgorithm::None {
        BlockFlags::empty()
    } else {
        BlockFlags::COMPRESSED
    };

    let body_len = PREFIX_SIZE + payload.len();
    let header = BlockHeader {
        block_type: BlockType::Data,
        flags,
        length: (BLOCK_HEADER_SIZE + body_len) as u64,
    };

    let mut buf = Vec::with_capacity(header.length as usize);
    header.write_to(&mut buf);
    buf.put_u32_le(odid);
    buf.put_u16_le(session_id);
    buf.put_u8(compression.as_byte());
    buf.put_u32_le(raw.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Reads and fully decompresses a Data Block.
pub fn decode(buf: &mut impl Buf) -> Result<DecodedDataBlock> {
    let header = BlockHeader::read_from(buf)?;
    if header.block_type != BlockType::Data {
        return Err(Error::format("expected a data block"));
    }
    if buf.remaining() < PREFIX_SIZE {
        return Err(Error::format("truncated data block"));
    }
    let odid = buf.get_u32_le();
    let session_id = buf.get_u16_le();
    let compression = CompressionAlgorithm::from_byte(buf.get_u8())
        .ok_or_else(|| Error::format("unknown compression method in data block"))?;
    let uncompressed_len = buf.get_u32_le() as usize;

    let payload_len = header.length as usize - BLOCK_HEADER_SIZE - PREFIX_SIZE;
    if buf.remaining() < payload_len {
        return Err(Error::format("truncated data block payload"));
    }
    let mut compressed = vec![0u8; payload_len];
    buf.copy_to_slice(&mut compressed);

    let mut payload = Vec::new();
    compression::decompress(compression, &compressed, uncompressed_len, &mut payload)?;

    Ok(DecodedDataBlock {
        odid,
        session_id,
        payload,
    })
}

/// Reads just the `(odid, session_id)` pair out of a Data or Templates
/// Block's common body prefix, without touching the payload. Both block
/// types start their body with these two fields (spec §4.6, §4.8), which is
/// what lets a Content Table rebuild-by-scan identify ownership cheaply.
pub fn peek_identity(body_prefix: &[u8; 6]) -> DataBlockIdentity {
    DataBlockIdentity {
        odid: u32::from_le_bytes(body_prefix[0..4].try_into().unwrap()),
        session_id: u16::from_le_bytes(body_prefix[4..6].try_into().unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_uncompressed() {
        let raw = b"some uncompressed ipfix bytes".to_vec();
        let block = encode(7, 3, CompressionAlgorithm::None, &raw).unwrap();
        let mut cursor = &block[..];
        let decoded = decode(&mut cursor).unwrap();
        assert_eq!(decoded.odid, 7);
        assert_eq!(decoded.session_id, 3);
        assert_eq!(decoded.payload, raw);
    }

    #[test]
    fn round_trips_compressed() {
        let raw = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let block = encode(1, 1, CompressionAlgorithm::Lz4, &raw).unwrap();
        let mut cursor = &block[..];
        let decoded = decode(&mut cursor).unwrap();
        assert_eq!(decoded.payload, raw);
    }

    #[test]
    fn rejects_non_data_block_type() {
        let mut buf = Vec::new();
        BlockHeader {
            block_type: BlockType::Session,
            flags: BlockFlags::empty(),
            length: BLOCK_HEADER_SIZE as u64,
        }
        .write_to(&mut buf);
        let mut cursor = &buf[..];
        assert!(decode(&mut cursor).is_err());
    }
}
