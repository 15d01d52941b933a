//! Block-structured on-disk layout (spec §5, grounded on `structure.h`):
//! a file is a header, a sequence of blocks, and a trailing Content Table
//! block that indexes them.

pub mod content_table;
pub mod data_block;
pub mod data_reader;
pub mod data_writer;
pub mod session;
pub mod templates;

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Identifies the file's magic number (`"FDS1"` read little-endian).
pub const FILE_MAGIC: u32 = 0x3153_4446;
pub const FILE_VERSION: u8 = 1;

/// Per-Data-Block uncompressed size cap (spec §4.8, §4.9).
pub const DATA_BLOCK_MAX_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Session = 1,
    Templates = 2,
    Data = 3,
    ContentTable = 4,
}

impl BlockType {
    pub fn from_u16(v: u16) -> Result<Self> {
        match v {
            1 => Ok(BlockType::Session),
            2 => Ok(BlockType::Templates),
            3 => Ok(BlockType::Data),
            4 => Ok(BlockType::ContentTable),
            other => Err(Error::format(format!("unknown block type {other}"))),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

bitflags::bitflags! {
    /// Common per-block flags (spec §5); only bit 0 is currently defined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u16 {
        const COMPRESSED = 1 << 0;
    }
}

/// Size in bytes of the common block header on disk.
pub const BLOCK_HEADER_SIZE: usize = 2 + 2 + 8;

/// Common header shared by every block: type, flags, and total length
/// (including this header) so a reader that does not understand a block
/// type can still skip over it (spec §5).
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub block_type: BlockType,
    pub flags: BlockFlags,
    pub length: u64,
}

impl BlockHeader {
    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.block_type.as_u16());
        buf.put_u16_le(self.flags.bits());
        buf.put_u64_le(self.length);
    }

    pub fn read_from(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < BLOCK_HEADER_SIZE {
            return Err(Error::format("truncated block header"));
        }
        let block_type = BlockType::from_u16(buf.get_u16_le())?;
        let flags = BlockFlags::from_bits_truncate(buf.get_u16_le());
        let length = buf.get_u64_le();
        Ok(BlockHeader {
            block_type,
            flags,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_round_trips() {
        let hdr = BlockHeader {
            block_type: BlockType::Data,
            flags: BlockFlags::COMPRESSED,
            length: 4096,
        };
        let mut buf = Vec::new();
        hdr.write_to(&mut buf);
        assert_eq!(buf.len(), BLOCK_HEADER_SIZE);

        let mut cursor = &buf[..];
        let decoded = BlockHeader::read_from(&mut cursor).unwrap();
        assert_eq!(decoded.block_type, BlockType::Data);
        assert!(decoded.flags.contains(BlockFlags::COMPRESSED));
        assert_eq!(decoded.length, 4096);
    }

    #[test]
    fn unknown_block_type_is_format_error() {
        let mut buf = vec![0u8; BLOCK_HEADER_SIZE];
        buf[0] = 99;
        let mut cursor = &buf[..];
        let err = BlockHeader::read_from(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }
}
