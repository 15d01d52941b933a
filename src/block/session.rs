//! Session Block: identifies one Transport Session (exporter/collector
//! pair) that Template and Data blocks are scoped to (spec §4.6, §5,
//! grounded on `fds_file_bsession`/`fds_file_session_proto`).

use bytes::{Buf, BufMut};

use crate::block::{BlockFlags, BlockHeader, BlockType, BLOCK_HEADER_SIZE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionProto {
    Unknown = 0,
    Udp = 1,
    Tcp = 2,
    Sctp = 3,
}

impl SessionProto {
    pub fn from_u16(v: u16) -> Result<Self> {
        match v {
            0 => Ok(SessionProto::Unknown),
            1 => Ok(SessionProto::Udp),
            2 => Ok(SessionProto::Tcp),
            3 => Ok(SessionProto::Sctp),
            other => Err(Error::format(format!("unknown session protocol {other}"))),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Identifies a Transport Session between an exporting and a collecting
/// process (spec §4.6). `Ord` follows the dedup-equality-then-lookup order
/// the File Writer uses when deciding whether an incoming session
/// descriptor already has an internal ID: ports first (the cheapest,
/// highest-cardinality discriminator), then protocol, then the address
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub ip_src: [u8; 16],
    pub ip_dst: [u8; 16],
    pub port_src: u16,
    pub port_dst: u16,
    pub proto: SessionProto,
}

impl PartialOrd for SessionDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SessionDescriptor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.port_src, self.port_dst, self.proto, self.ip_src, self.ip_dst).cmp(&(
            other.port_src,
            other.port_dst,
            other.proto,
            other.ip_src,
            other.ip_dst,
        ))
    }
}

/// A Session Block as it appears on disk: a [`SessionDescriptor`] plus the
/// internally assigned Session ID used to scope Template and Data blocks
/// (spec §4.6, §5). Unlike Data Blocks, Session Blocks never compress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBlock {
    pub session_id: u16,
    pub descriptor: SessionDescriptor,
    /// Reserved for future sampling-method bits; always written as zero.
    pub feature_flags: u32,
}

/// Size of the Session Block body (excluding the common block header).
const BODY_SIZE: usize = 4 + 2 + 2 + 16 + 16 + 2 + 2;

impl SessionBlock {
    pub fn encoded_len(&self) -> u64 {
        (BLOCK_HEADER_SIZE + BODY_SIZE) as u64
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        let header = BlockHeader {
            block_type: BlockType::Session,
            flags: BlockFlags::empty(),
            length: self.encoded_len(),
        };
        header.write_to(buf);

        buf.put_u32_le(self.feature_flags);
        buf.put_u16_le(self.session_id);
        buf.put_u16_le(self.descriptor.proto.as_u16());
        buf.put_slice(&self.descriptor.ip_src);
        buf.put_slice(&self.descriptor.ip_dst);
        buf.put_u16_le(self.descriptor.port_src);
        buf.put_u16_le(self.descriptor.port_dst);
    }

    pub fn read_from(buf: &mut impl Buf) -> Result<Self> {
        let header = BlockHeader::read_from(buf)?;
        if header.block_type != BlockType::Session {
            return Err(Error::format("expected a session block"));
        }
        if buf.remaining() < BODY_SIZE {
            return Err(Error::format("truncated session block"));
        }

        let feature_flags = buf.get_u32_le();
        let session_id = buf.get_u16_le();
        let proto = SessionProto::from_u16(buf.get_u16_le())?;
        let mut ip_src = [0u8; 16];
        let mut ip_dst = [0u8; 16];
        buf.copy_to_slice(&mut ip_src);
        buf.copy_to_slice(&mut ip_dst);
        let port_src = buf.get_u16_le();
        let port_dst = buf.get_u16_le();

        Ok(SessionBlock {
            session_id,
            feature_flags,
            descriptor: SessionDescriptor {
                ip_src,
                ip_dst,
                port_src,
                port_dst,
                proto,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(port_src: u16) -> SessionDescriptor {
        SessionDescriptor {
            ip_src: [1; 16],
            ip_dst: [2; 16],
            port_src,
            port_dst: 2055,
            proto: SessionProto::Udp,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let block = SessionBlock {
            session_id: 7,
            descriptor: descriptor(5000),
            feature_flags: 0,
        };
        let mut buf = Vec::new();
        block.write_to(&mut buf);
        assert_eq!(buf.len() as u64, block.encoded_len());

        let mut cursor = &buf[..];
        let decoded = SessionBlock::read_from(&mut cursor).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn ordering_is_port_first() {
        let a = descriptor(1000);
        let b = descriptor(2000);
        assert!(a < b);
    }

    #[test]
    fn rejects_non_session_block_type() {
        let mut buf = Vec::new();
        BlockHeader {
            block_type: BlockType::Data,
            flags: BlockFlags::empty(),
            length: BLOCK_HEADER_SIZE as u64,
        }
        .write_to(&mut buf);
        let mut cursor = &buf[..];
        assert!(SessionBlock::read_from(&mut cursor).is_err());
    }
}
