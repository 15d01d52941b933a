//! Templates Block: the set of (Options) Templates valid for one
//! `(session_id, odid)` pair, stored verbatim as wire-format IPFIX
//! Template/Options Template records (spec §4.6, §5, grounded on
//! `fds_file_btmplt`/`fds_file_trec`).
//!
//! On disk this is just a flat list of records; in memory it is backed by
//! a [`TemplateManager`] pinned to [`SessionType::File`] and a single,
//! never-advanced Export Time, since a Templates Block has no time
//! dimension of its own -- it IS the snapshot for its `(session, odid)`.

use bytes::{Buf, BufMut};

use crate::block::{BlockFlags, BlockHeader, BlockType, BLOCK_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::ie::IeManagerRef;
use crate::template::manager::{SessionType, TemplateManager};
use crate::template::snapshot::Snapshot;
use crate::template::TemplateType;

const PINNED_TIME: u32 = 0;

/// In-memory view of one Templates Block's content.
pub struct TemplatesBlock {
    pub odid: u32,
    pub session_id: u16,
    manager: TemplateManager,
}

impl TemplatesBlock {
    pub fn new(session_id: u16, odid: u32) -> Self {
        let mut manager = TemplateManager::new(SessionType::File);
        manager.set_time(PINNED_TIME).expect("pinned time is always valid");
        TemplatesBlock {
            odid,
            session_id,
            manager,
        }
    }

    pub fn set_iemgr(&mut self, iemgr: IeManagerRef) -> Result<()> {
        self.manager.set_iemgr(iemgr)?;
        self.manager.set_time(PINNED_TIME)
    }

    pub fn add(&mut self, kind: TemplateType, raw: &[u8]) -> Result<()> {
        self.manager.template_add(kind, raw)
    }

    pub fn remove(&mut self, id: u16) -> Result<()> {
        self.manager.template_remove(id, None)
    }

    pub fn snapshot(&mut self) -> Result<std::sync::Arc<Snapshot>> {
        self.manager.snapshot_get()
    }

    pub fn count(&self) -> u16 {
        self.manager.current_len()
    }

    /// Non-mutating lookup used to detect whether a [`TemplatesBlock::add`]
    /// actually changed anything (bit-identical redefinitions reuse the same
    /// `Arc`, so callers can compare via `Arc::ptr_eq`).
    pub fn get_template(&self, id: u16) -> Result<std::sync::Arc<crate::template::Template>> {
        self.manager.template_get(id)
    }

    pub fn clear(&mut self) {
        self.manager.clear();
        // clear() drops the time context; re-pin it since a Templates Block
        // always operates at a single fixed instant.
        let _ = self.manager.set_time(PINNED_TIME);
    }

    /// Serializes every template currently bound in this block as a
    /// Templates Block (common header + ODID + Session ID + a sequence of
    /// `fds_file_trec`-shaped records).
    pub fn write_to(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        let snapshot = self.manager.snapshot_get()?;
        let mut body = Vec::new();
        body.put_u32_le(self.odid);
        body.put_u16_le(self.session_id);

        for (_, template) in snapshot.iter() {
            let rec_type: u16 = match template.template_type {
                TemplateType::Data => 0,
                TemplateType::Options => 1,
            };
            let length = 4 + template.raw.len();
            body.put_u16_le(rec_type);
            body.put_u16_le(length as u16);
            body.put_slice(&template.raw);
        }

        let header = BlockHeader {
            block_type: BlockType::Templates,
            flags: BlockFlags::empty(),
            length: (BLOCK_HEADER_SIZE + body.len()) as u64,
        };
        header.write_to(buf);
        buf.extend_from_slice(&body);
        Ok(())
    }

    /// Parses a previously-written Templates Block back into a fresh
    /// manager pinned at Export Time 0.
    pub fn read_from(buf: &mut impl Buf, iemgr: &IeManagerRef) -> Result<Self> {
        let header = BlockHeader::read_from(buf)?;
        if header.block_type != BlockType::Templates {
            return Err(Error::format("expected a templates block"));
        }
        if buf.remaining() < 6 {
            return Err(Error::format("truncated templates block"));
        }
        let odid = buf.get_u32_le();
        let session_id = buf.get_u16_le();

        let mut block = TemplatesBlock::new(session_id, odid);
        block.manager.set_iemgr(iemgr.clone())?;
        block.manager.set_time(PINNED_TIME)?;

        while buf.has_remaining() {
            if buf.remaining() < 4 {
                return Err(Error::format("truncated template record header"));
            }
            let rec_type = buf.get_u16_le();
            let length = buf.get_u16_le() as usize;
            if length < 4 || buf.remaining() < length - 4 {
                return Err(Error::format("truncated template record body"));
            }
            let body_len = length - 4;
            let mut body = vec![0u8; body_len];
            buf.copy_to_slice(&mut body);

            let kind = match rec_type {
                0 => TemplateType::Data,
                1 => TemplateType::Options,
                other => return Err(Error::format(format!("unknown template record type {other}"))),
            };
            block.manager.template_add(kind, &body)?;
        }

        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie::null_iemgr;

    fn data_template_bytes(id: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&8u16.to_be_bytes());
        body.extend_from_slice(&4u16.to_be_bytes());
        body
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut block = TemplatesBlock::new(3, 42);
        block.add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        block.add(TemplateType::Data, &data_template_bytes(301)).unwrap();

        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();

        let iemgr = null_iemgr();
        let mut cursor = &buf[..];
        let mut decoded = TemplatesBlock::read_from(&mut cursor, &iemgr).unwrap();
        assert_eq!(decoded.odid, 42);
        assert_eq!(decoded.session_id, 3);
        assert_eq!(decoded.count(), 2);
    }
}
