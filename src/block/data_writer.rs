//! Data Block writer: packs IPFIX Data Records belonging to one
//! `(session, odid)` pair into capped IPFIX Messages and Sets, ready to be
//! compressed and written out as a Data Block (spec §4.8, grounded on
//! `Block_data_writer.hpp`).

use bytes::BufMut;

use crate::error::{Error, Result};
use crate::stats::{ProtoBucket, Stats};
use crate::template::Template;

const IPFIX_VERSION: u16 = 0x000a;
const MSG_HDR_LEN: usize = 16;
const SET_HDR_LEN: usize = 4;
pub const DEFAULT_MSG_SIZE: u16 = 1400;

/// Largest a single encoded record can be and still fit, on its own, inside
/// one IPFIX Message: the Message length field is a `u16`, so a record that
/// alone exceeds this would overflow it even in an otherwise-empty Message
/// and Set.
const MAX_RECORD_LEN: usize = 65535 - MSG_HDR_LEN - SET_HDR_LEN;

/// Accumulates Data Records for a single Data Block, in raw (uncompressed)
/// wire form, ready to be handed to [`crate::compression`] and then to the
/// File Writer.
pub struct DataWriter {
    odid: u32,
    msg_size_max: u16,
    capacity: usize,

    buffer: Vec<u8>,
    rec_count: u32,
    stats: Stats,

    export_time_set: u32,
    export_time_now: u32,
    pos_msg: Option<usize>,
    pos_set: Option<usize>,
    seq_next: u32,
    tid_now: u16,
}

impl DataWriter {
    pub fn new(odid: u32, capacity: usize, msg_size_max: u16) -> Self {
        DataWriter {
            odid,
            msg_size_max,
            capacity,
            buffer: Vec::new(),
            rec_count: 0,
            stats: Stats::default(),
            export_time_set: 0,
            export_time_now: 0,
            pos_msg: None,
            pos_set: None,
            seq_next: 0,
            tid_now: 0,
        }
    }

    pub fn odid(&self) -> u32 {
        self.odid
    }

    pub fn count(&self) -> u32 {
        self.rec_count
    }

    /// The statistics accumulated since the last [`DataWriter::finish`],
    /// without consuming them.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn set_export_time(&mut self, time: u32) {
        self.export_time_set = time;
    }

    /// Worst-case remaining capacity for a record, accounting for the
    /// overhead of opening a fresh Message and Set if neither is open.
    pub fn remains(&self) -> usize {
        let required = self.buffer.len() + MSG_HDR_LEN + SET_HDR_LEN;
        self.capacity.saturating_sub(required)
    }

    fn close_set(&mut self) {
        if let Some(pos) = self.pos_set.take() {
            let length = (self.buffer.len() - pos) as u16;
            self.buffer[pos + 2..pos + 4].copy_from_slice(&length.to_be_bytes());
        }
    }

    fn close_message(&mut self) {
        self.close_set();
        if let Some(pos) = self.pos_msg.take() {
            let length = (self.buffer.len() - pos) as u16;
            self.buffer[pos + 2..pos + 4].copy_from_slice(&length.to_be_bytes());
        }
    }

    fn open_message(&mut self) {
        self.close_message();
        let pos = self.buffer.len();
        self.buffer.put_u16(IPFIX_VERSION);
        self.buffer.put_u16(0); // length, patched on close
        self.buffer.put_u32(self.export_time_set);
        self.buffer.put_u32(self.seq_next);
        self.buffer.put_u32(self.odid);
        self.pos_msg = Some(pos);
        self.export_time_now = self.export_time_set;
        self.seq_next = self.seq_next.wrapping_add(1);
    }

    fn open_set(&mut self, template_id: u16) {
        self.close_set();
        let pos = self.buffer.len();
        self.buffer.put_u16(template_id);
        self.buffer.put_u16(0); // length, patched on close
        self.pos_set = Some(pos);
        self.tid_now = template_id;
    }

    /// Adds one Data Record encoded against `template`. Opens a new IPFIX
    /// Message if the Export Time changed or none is open yet, and a new
    /// Set if the Template ID changed, none is open, or appending would
    /// exceed the configured maximum Message size.
    pub fn add(&mut self, template: &Template, data: &[u8], proto: u8, bytes: u64, pkts: u64) -> Result<()> {
        let rec_len = template.encoded_record_length(data)?;
        if rec_len != data.len() {
            return Err(Error::format(
                "data record length does not match its template's encoded length",
            ));
        }
        if rec_len > MAX_RECORD_LEN {
            return Err(Error::argument(format!(
                "encoded record length {rec_len} exceeds the maximum {MAX_RECORD_LEN} a single IPFIX message can hold"
            )));
        }

        let need_new_message = self.pos_msg.is_none() || self.export_time_now != self.export_time_set;
        if need_new_message {
            self.open_message();
        } else {
            let extra_set_hdr = if self.pos_set.is_some() && self.tid_now == template.id {
                0
            } else {
                SET_HDR_LEN
            };
            let msg_len = self.buffer.len() - self.pos_msg.unwrap();
            if msg_len + extra_set_hdr + rec_len > usize::from(self.msg_size_max) {
                self.open_message();
            }
        }

        if self.pos_set.is_none() || self.tid_now != template.id {
            self.open_set(template.id);
        }

        if self.buffer.len() + rec_len > self.capacity {
            return Err(Error::argument("data block buffer is full"));
        }

        self.buffer.extend_from_slice(data);
        self.rec_count += 1;

        let bucket = ProtoBucket::from_protocol_identifier(proto);
        let is_options = matches!(template.template_type, crate::template::TemplateType::Options);
        let is_biflow = template.has_reverse_ie;
        self.stats.add_record(bucket, bytes, pkts, is_options, is_biflow);

        Ok(())
    }

    /// Finalizes any open Message/Set, and returns the raw (uncompressed)
    /// buffer plus the statistics accumulated since the last flush. The
    /// writer is left ready to accept a new Data Block's records; the
    /// configured Export Time is preserved across flushes.
    pub fn finish(&mut self) -> (Vec<u8>, Stats) {
        self.close_message();
        let buffer = std::mem::take(&mut self.buffer);
        let stats = std::mem::take(&mut self.stats);
        self.rec_count = 0;
        self.pos_msg = None;
        self.pos_set = None;
        (buffer, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie::null_iemgr;
    use crate::template::TemplateType;

    fn fixed_template(id: u16, field_len: u16) -> Template {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&8u16.to_be_bytes());
        body.extend_from_slice(&field_len.to_be_bytes());
        let iemgr = null_iemgr();
        Template::parse(TemplateType::Data, &body, 0, 0, &iemgr).unwrap().0
    }

    #[test]
    fn add_and_finish_produces_well_formed_message() {
        let mut writer = DataWriter::new(42, 1024 * 1024, DEFAULT_MSG_SIZE);
        writer.set_export_time(1000);
        let tmplt = fixed_template(300, 4);
        writer.add(&tmplt, &[1, 2, 3, 4], 17, 4, 1).unwrap();
        assert_eq!(writer.count(), 1);

        let (buf, stats) = writer.finish();
        assert_eq!(&buf[0..2], &IPFIX_VERSION.to_be_bytes());
        let msg_len = u16::from_be_bytes([buf[2], buf[3]]);
        assert_eq!(msg_len as usize, buf.len());
        assert_eq!(stats.recs_total, 1);
        assert_eq!(stats.recs_udp, 1);
    }

    #[test]
    fn record_exceeding_the_message_size_ceiling_is_rejected() {
        let mut writer = DataWriter::new(1, 1024 * 1024, DEFAULT_MSG_SIZE);
        writer.set_export_time(0);
        let field_len = (MAX_RECORD_LEN + 1) as u16;
        let tmplt = fixed_template(300, field_len);
        let data = vec![0u8; field_len as usize];
        let err = writer.add(&tmplt, &data, 6, field_len as u64, 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
    }

    #[test]
    fn record_length_mismatch_is_rejected() {
        let mut writer = DataWriter::new(1, 1024, DEFAULT_MSG_SIZE);
        writer.set_export_time(0);
        let tmplt = fixed_template(300, 4);
        assert!(writer.add(&tmplt, &[1, 2, 3], 6, 3, 1).is_err());
    }

    #[test]
    fn export_time_change_opens_new_message() {
        let mut writer = DataWriter::new(1, 1024 * 1024, DEFAULT_MSG_SIZE);
        let tmplt = fixed_template(300, 4);
        writer.set_export_time(10);
        writer.add(&tmplt, &[1, 2, 3, 4], 6, 4, 1).unwrap();
        writer.set_export_time(20);
        writer.add(&tmplt, &[5, 6, 7, 8], 6, 4, 1).unwrap();

        let (buf, _stats) = writer.finish();
        let first_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        assert!(first_len < buf.len());
    }
}
