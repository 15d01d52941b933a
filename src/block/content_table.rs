//! Content Table Block: an index of Session and Data block locations
//! written once near the end of a file (or rebuilt by scanning when
//! missing or stale), so a reader doesn't have to walk every block linearly
//! (spec §4.7, §5, grounded on `fds_file_bctable`/`fds_file_ctable_*`).
//!
//! The on-disk table is forward-compatible: `block_flags` is a bitset of
//! which record lists are present, and `offsets[]` holds one relative
//! offset per *set* bit, in ascending bit-index order. A reader from a
//! future version that defines additional bits simply skips any entries it
//! does not recognize, by popcount position rather than a fixed layout.

use std::collections::HashMap;
use std::os::unix::fs::FileExt;

use bytes::{Buf, BufMut};

use crate::block::session::SessionBlock;
use crate::block::{data_block, BlockFlags, BlockHeader, BlockType, BLOCK_HEADER_SIZE};
use crate::error::{Error, Result};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContentTableBlocks: u32 {
        const SESSION = 1 << 0;
        const DATA = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecord {
    pub offset: u64,
    pub length: u64,
    pub session_id: u16,
    pub flags: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRecord {
    pub offset: u64,
    pub length: u64,
    pub offset_tmplts: u64,
    pub odid: u32,
    pub session_id: u16,
    pub flags: u16,
}

/// In-memory content table: ordered lists of Session and Data block
/// positions, keyed by file offset (spec §4.7).
#[derive(Debug, Default, Clone)]
pub struct ContentTable {
    pub sessions: Vec<SessionRecord>,
    pub data_blocks: Vec<DataRecord>,
}

impl ContentTable {
    pub fn new() -> Self {
        ContentTable::default()
    }

    pub fn add_session(&mut self, rec: SessionRecord) {
        let pos = self.sessions.partition_point(|r| r.offset < rec.offset);
        self.sessions.insert(pos, rec);
    }

    pub fn add_data_block(&mut self, rec: DataRecord) {
        let pos = self.data_blocks.partition_point(|r| r.offset < rec.offset);
        self.data_blocks.insert(pos, rec);
    }

    /// Data blocks belonging to the given session and ODID, in file order
    /// (the iteration order a File Reader replays records in).
    pub fn data_blocks_for(&self, session_id: u16, odid: u32) -> impl Iterator<Item = &DataRecord> {
        self.data_blocks
            .iter()
            .filter(move |r| r.session_id == session_id && r.odid == odid)
    }

    pub fn session_by_id(&self, session_id: u16) -> Option<&SessionRecord> {
        self.sessions.iter().find(|r| r.session_id == session_id)
    }

    /// Serializes the table as a Content Table Block. Stored offsets are
    /// relative to the start of this block, not the start of the file.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let mut present = ContentTableBlocks::empty();
        if !self.sessions.is_empty() {
            present.insert(ContentTableBlocks::SESSION);
        }
        if !self.data_blocks.is_empty() {
            present.insert(ContentTableBlocks::DATA);
        }

        let mut sub_blocks: Vec<Vec<u8>> = Vec::new();
        if present.contains(ContentTableBlocks::SESSION) {
            let mut sub = Vec::new();
            sub.put_u16_le(self.sessions.len() as u16);
            for rec in &self.sessions {
                sub.put_u64_le(rec.offset);
                sub.put_u64_le(rec.length);
                sub.put_u16_le(rec.session_id);
                sub.put_u16_le(rec.flags);
            }
            sub_blocks.push(sub);
        }
        if present.contains(ContentTableBlocks::DATA) {
            let mut sub = Vec::new();
            sub.put_u32_le(self.data_blocks.len() as u32);
            for rec in &self.data_blocks {
                sub.put_u64_le(rec.offset);
                sub.put_u64_le(rec.length);
                sub.put_u64_le(rec.offset_tmplts);
                sub.put_u32_le(rec.odid);
                sub.put_u16_le(rec.session_id);
                sub.put_u16_le(rec.flags);
            }
            sub_blocks.push(sub);
        }

        let header_and_flags_size = BLOCK_HEADER_SIZE + 4;
        let offsets_size = sub_blocks.len() * 8;
        let mut relative_offset = (header_and_flags_size + offsets_size) as u64;
        let mut offsets = Vec::with_capacity(sub_blocks.len());
        for sub in &sub_blocks {
            offsets.push(relative_offset);
            relative_offset += sub.len() as u64;
        }

        let total_len = relative_offset;
        let header = BlockHeader {
            block_type: BlockType::ContentTable,
            flags: BlockFlags::empty(),
            length: total_len,
        };
        header.write_to(buf);
        buf.put_u32_le(present.bits());
        for off in &offsets {
            buf.put_u64_le(*off);
        }
        for sub in &sub_blocks {
            buf.extend_from_slice(sub);
        }
    }

    pub fn read_from(buf: &mut impl Buf) -> Result<Self> {
        let header = BlockHeader::read_from(buf)?;
        if header.block_type != BlockType::ContentTable {
            return Err(Error::format("expected a content table block"));
        }
        if buf.remaining() < 4 {
            return Err(Error::format("truncated content table block"));
        }
        let present = ContentTableBlocks::from_bits_truncate(buf.get_u32_le());
        let total_bits = present.bits().count_ones() as usize;

        if buf.remaining() < total_bits * 8 {
            return Err(Error::format("truncated content table offsets"));
        }
        // The offsets array gives each present sub-block's position
        // relative to this block's header; since the sub-blocks themselves
        // are laid out contiguously in the same (ascending bit) order
        // immediately afterward, we can decode them positionally without
        // re-deriving absolute offsets. Unknown future bits are skipped
        // entirely: forward compatibility means not knowing how to
        // interpret their payload, only how to step over it via the
        // common block length.
        for _ in 0..total_bits {
            buf.get_u64_le();
        }

        let mut table = ContentTable::new();

        if present.contains(ContentTableBlocks::SESSION) {
            if buf.remaining() < 2 {
                return Err(Error::format("truncated session table"));
            }
            let count = buf.get_u16_le();
            for _ in 0..count {
                if buf.remaining() < 20 {
                    return Err(Error::format("truncated session record"));
                }
                table.sessions.push(SessionRecord {
                    offset: buf.get_u64_le(),
                    length: buf.get_u64_le(),
                    session_id: buf.get_u16_le(),
                    flags: buf.get_u16_le(),
                });
            }
        }

        if present.contains(ContentTableBlocks::DATA) {
            if buf.remaining() < 4 {
                return Err(Error::format("truncated data table"));
            }
            let count = buf.get_u32_le();
            for _ in 0..count {
                if buf.remaining() < 28 {
                    return Err(Error::format("truncated data record"));
                }
                table.data_blocks.push(DataRecord {
                    offset: buf.get_u64_le(),
                    length: buf.get_u64_le(),
                    offset_tmplts: buf.get_u64_le(),
                    odid: buf.get_u32_le(),
                    session_id: buf.get_u16_le(),
                    flags: buf.get_u16_le(),
                });
            }
        }

        Ok(table)
    }

    /// Rebuilds a table by scanning every block from `start` to `file_len`,
    /// used when the trailing Content Table is missing (a writer crashed
    /// before `close()`) or fails to parse. A Data Block's `offset_tmplts`
    /// is recovered by tracking, per `(session_id, odid)`, the offset of the
    /// most recently scanned Templates Block for that pair -- exactly the
    /// state a File Writer keeps live while appending (spec §4.7, §5).
    ///
    /// Returns the rebuilt table, the offset just past the last block fully
    /// parsed, and whether a short or unparseable trailing block was
    /// discarded.
    pub fn rebuild_by_scan(file: &std::fs::File, start: u64, file_len: u64) -> Result<(ContentTable, u64, bool)> {
        let mut offset = start;
        let mut table = ContentTable::new();
        let mut last_template_offset: HashMap<(u16, u32), u64> = HashMap::new();
        let mut truncated = false;

        loop {
            if offset + BLOCK_HEADER_SIZE as u64 > file_len {
                truncated = offset < file_len;
                break;
            }
            let hdr_bytes = read_exact_at(file, offset, BLOCK_HEADER_SIZE)?;
            let mut c = &hdr_bytes[..];
            let header = match BlockHeader::read_from(&mut c) {
                Ok(h) => h,
                Err(_) => {
                    truncated = true;
                    break;
                }
            };
            if header.block_type == BlockType::ContentTable {
                break;
            }
            if header.length < BLOCK_HEADER_SIZE as u64 || offset + header.length > file_len {
                truncated = true;
                break;
            }

            match header.block_type {
                BlockType::Session => {
                    let body = read_exact_at(file, offset, header.length as usize)?;
                    let mut bc = &body[..];
                    let block = SessionBlock::read_from(&mut bc)?;
                    table.add_session(SessionRecord {
                        offset,
                        length: header.length,
                        session_id: block.session_id,
                        flags: 0,
                    });
                }
                BlockType::Templates | BlockType::Data => {
                    if header.length < BLOCK_HEADER_SIZE as u64 + 6 {
                        truncated = true;
                        break;
                    }
                    let prefix_start = offset + BLOCK_HEADER_SIZE as u64;
                    let peeked = read_exact_at(file, prefix_start, 6)?;
                    let prefix: [u8; 6] = peeked.try_into().unwrap();
                    let identity = data_block::peek_identity(&prefix);

                    if header.block_type == BlockType::Templates {
                        last_template_offset.insert((identity.session_id, identity.odid), offset);
                    } else {
                        let offset_tmplts = last_template_offset
                            .get(&(identity.session_id, identity.odid))
                            .copied()
                            .unwrap_or(0);
                        table.add_data_block(DataRecord {
                            offset,
                            length: header.length,
                            offset_tmplts,
                            odid: identity.odid,
                            session_id: identity.session_id,
                            flags: 0,
                        });
                    }
                }
                BlockType::ContentTable => unreachable!(),
            }

            offset += header.length;
        }

        Ok((table, offset, truncated))
    }
}

fn read_exact_at(file: &std::fs::File, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = file.read_at(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(Error::format("unexpected end of file"));
        }
        read += n;
    }
    Ok(buf)
}
