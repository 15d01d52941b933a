//! The file header: magic, version, compression choice, and the embedded
//! running statistics block (spec §6, grounded on `fds_file_hdr`).

use bytes::{Buf, BufMut};

use crate::compression::CompressionAlgorithm;
use crate::error::{Error, Result};
use crate::stats::{Stats, STATS_SIZE};

pub const FILE_MAGIC: u32 = 0x3153_4446;
pub const FILE_VERSION: u8 = 1;

/// Size of the fixed-layout prefix (everything before the embedded stats).
const PREFIX_SIZE: usize = 4 + 1 + 1 + 2 + 8;
pub const HEADER_SIZE: usize = PREFIX_SIZE + STATS_SIZE;

/// The 16-byte fixed prefix plus embedded statistics written at offset 0 of
/// every FDS file.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub compression: CompressionAlgorithm,
    /// Offset of the Content Table; `0` means "not finalized, rebuild by
    /// scan" (spec §4.7, §5).
    pub table_offset: u64,
    pub stats: Stats,
}

impl FileHeader {
    pub fn new(compression: CompressionAlgorithm) -> Self {
        FileHeader {
            compression,
            table_offset: 0,
            stats: Stats::default(),
        }
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(FILE_MAGIC);
        buf.put_u8(FILE_VERSION);
        buf.put_u8(self.compression.as_byte());
        buf.put_u16_le(0); // reserved flags
        buf.put_u64_le(self.table_offset);
        self.stats.write_to(buf);
    }

    pub fn read_from(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(Error::format("truncated file header"));
        }
        let magic = buf.get_u32_le();
        if magic != FILE_MAGIC {
            return Err(Error::format(format!("bad file magic {magic:#x}")));
        }
        let version = buf.get_u8();
        if version != FILE_VERSION {
            return Err(Error::format(format!("unsupported file version {version}")));
        }
        let compression = CompressionAlgorithm::from_byte(buf.get_u8())
            .ok_or_else(|| Error::format("unknown compression method in file header"))?;
        let _flags = buf.get_u16_le();
        let table_offset = buf.get_u64_le();
        let stats = Stats::read_from(buf);

        Ok(FileHeader {
            compression,
            table_offset,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut header = FileHeader::new(CompressionAlgorithm::Lz4);
        header.table_offset = 4096;
        header.stats.recs_total = 10;

        let mut buf = Vec::new();
        header.write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let mut cursor = &buf[..];
        let decoded = FileHeader::read_from(&mut cursor).unwrap();
        assert_eq!(decoded.compression, CompressionAlgorithm::Lz4);
        assert_eq!(decoded.table_offset, 4096);
        assert_eq!(decoded.stats.recs_total, 10);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; HEADER_SIZE];
        let mut cursor = &buf[..];
        let err = FileHeader::read_from(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }
}
