//! The persisted statistics block embedded in the file header (spec §6).

use bytes::{Buf, BufMut};

/// Per-protocol record/byte/packet counters, plus the protocol-agnostic
/// totals. Laid out exactly as specified in spec §6 so the struct can be
/// read/written as 20 little-endian `u64` fields, in declaration order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub recs_total: u64,
    pub recs_bf_total: u64,
    pub recs_opts_total: u64,
    pub bytes_total: u64,
    pub pkts_total: u64,

    pub recs_tcp: u64,
    pub recs_udp: u64,
    pub recs_icmp: u64,
    pub recs_other: u64,

    pub recs_bf_tcp: u64,
    pub recs_bf_udp: u64,
    pub recs_bf_icmp: u64,
    pub recs_bf_other: u64,

    pub bytes_tcp: u64,
    pub bytes_udp: u64,
    pub bytes_icmp: u64,
    pub bytes_other: u64,

    pub pkts_tcp: u64,
    pub pkts_udp: u64,
    pub pkts_icmp: u64,
    pub pkts_other: u64,
}

/// Number of `u64` fields in the on-disk statistics block (spec §6).
pub const STATS_FIELD_COUNT: usize = 20;
/// Size, in bytes, of the serialized statistics block.
pub const STATS_SIZE: usize = STATS_FIELD_COUNT * 8;

/// Protocol bucket used when accumulating statistics while writing records
/// (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoBucket {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl ProtoBucket {
    /// Classifies an IANA `protocolIdentifier` value.
    pub fn from_protocol_identifier(proto: u8) -> Self {
        match proto {
            6 => ProtoBucket::Tcp,
            17 => ProtoBucket::Udp,
            1 | 58 => ProtoBucket::Icmp,
            _ => ProtoBucket::Other,
        }
    }
}

impl Stats {
    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.recs_total);
        buf.put_u64_le(self.recs_bf_total);
        buf.put_u64_le(self.recs_opts_total);
        buf.put_u64_le(self.bytes_total);
        buf.put_u64_le(self.pkts_total);

        buf.put_u64_le(self.recs_tcp);
        buf.put_u64_le(self.recs_udp);
        buf.put_u64_le(self.recs_icmp);
        buf.put_u64_le(self.recs_other);

        buf.put_u64_le(self.recs_bf_tcp);
        buf.put_u64_le(self.recs_bf_udp);
        buf.put_u64_le(self.recs_bf_icmp);
        buf.put_u64_le(self.recs_bf_other);

        buf.put_u64_le(self.bytes_tcp);
        buf.put_u64_le(self.bytes_udp);
        buf.put_u64_le(self.bytes_icmp);
        buf.put_u64_le(self.bytes_other);

        buf.put_u64_le(self.pkts_tcp);
        buf.put_u64_le(self.pkts_udp);
        buf.put_u64_le(self.pkts_icmp);
        buf.put_u64_le(self.pkts_other);
    }

    pub fn read_from(buf: &mut impl Buf) -> Self {
        Stats {
            recs_total: buf.get_u64_le(),
            recs_bf_total: buf.get_u64_le(),
            recs_opts_total: buf.get_u64_le(),
            bytes_total: buf.get_u64_le(),
            pkts_total: buf.get_u64_le(),

            recs_tcp: buf.get_u64_le(),
            recs_udp: buf.get_u64_le(),
            recs_icmp: buf.get_u64_le(),
            recs_other: buf.get_u64_le(),

            recs_bf_tcp: buf.get_u64_le(),
            recs_bf_udp: buf.get_u64_le(),
            recs_bf_icmp: buf.get_u64_le(),
            recs_bf_other: buf.get_u64_le(),

            bytes_tcp: buf.get_u64_le(),
            bytes_udp: buf.get_u64_le(),
            bytes_icmp: buf.get_u64_le(),
            bytes_other: buf.get_u64_le(),

            pkts_tcp: buf.get_u64_le(),
            pkts_udp: buf.get_u64_le(),
            pkts_icmp: buf.get_u64_le(),
            pkts_other: buf.get_u64_le(),
        }
    }

    /// Folds one record's accounting into the running totals (spec §4.8).
    ///
    /// `is_options` records only bump `recs_opts_total`; `is_biflow` records
    /// additionally bump the `*_bf_*` counters on top of the normal ones.
    #[allow(clippy::too_many_arguments)]
    pub fn add_record(
        &mut self,
        bucket: ProtoBucket,
        bytes: u64,
        pkts: u64,
        is_options: bool,
        is_biflow: bool,
    ) {
        if is_options {
            self.recs_opts_total += 1;
            return;
        }

        self.recs_total += 1;
        self.bytes_total += bytes;
        self.pkts_total += pkts;

        let (recs, recs_bf, byt, pk) = match bucket {
            ProtoBucket::Tcp => (
                &mut self.recs_tcp,
                &mut self.recs_bf_tcp,
                &mut self.bytes_tcp,
                &mut self.pkts_tcp,
            ),
            ProtoBucket::Udp => (
                &mut self.recs_udp,
                &mut self.recs_bf_udp,
                &mut self.bytes_udp,
                &mut self.pkts_udp,
            ),
            ProtoBucket::Icmp => (
                &mut self.recs_icmp,
                &mut self.recs_bf_icmp,
                &mut self.bytes_icmp,
                &mut self.pkts_icmp,
            ),
            ProtoBucket::Other => (
                &mut self.recs_other,
                &mut self.recs_bf_other,
                &mut self.bytes_other,
                &mut self.pkts_other,
            ),
        };

        *recs += 1;
        *byt += bytes;
        *pk += pkts;

        if is_biflow {
            self.recs_bf_total += 1;
            *recs_bf += 1;
        }
    }
}

impl std::ops::AddAssign for Stats {
    fn add_assign(&mut self, other: Self) {
        self.recs_total += other.recs_total;
        self.recs_bf_total += other.recs_bf_total;
        self.recs_opts_total += other.recs_opts_total;
        self.bytes_total += other.bytes_total;
        self.pkts_total += other.pkts_total;

        self.recs_tcp += other.recs_tcp;
        self.recs_udp += other.recs_udp;
        self.recs_icmp += other.recs_icmp;
        self.recs_other += other.recs_other;

        self.recs_bf_tcp += other.recs_bf_tcp;
        self.recs_bf_udp += other.recs_bf_udp;
        self.recs_bf_icmp += other.recs_bf_icmp;
        self.recs_bf_other += other.recs_bf_other;

        self.bytes_tcp += other.bytes_tcp;
        self.bytes_udp += other.bytes_udp;
        self.bytes_icmp += other.bytes_icmp;
        self.bytes_other += other.bytes_other;

        self.pkts_tcp += other.pkts_tcp;
        self.pkts_udp += other.pkts_udp;
        self.pkts_icmp += other.pkts_icmp;
        self.pkts_other += other.pkts_other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let stats = Stats {
            recs_total: 10_000,
            bytes_total: 5_000_000,
            pkts_total: 20_000,
            recs_udp: 10_000,
            bytes_udp: 5_000_000,
            pkts_udp: 20_000,
            ..Default::default()
        };

        let mut buf = Vec::new();
        stats.write_to(&mut buf);
        assert_eq!(buf.len(), STATS_SIZE);

        let mut cursor = &buf[..];
        let decoded = Stats::read_from(&mut cursor);
        assert_eq!(decoded, stats);
    }

    #[test]
    fn add_record_buckets_by_protocol() {
        let mut stats = Stats::default();
        stats.add_record(ProtoBucket::from_protocol_identifier(17), 1000, 2, false, false);
        stats.add_record(ProtoBucket::from_protocol_identifier(6), 500, 1, false, true);

        assert_eq!(stats.recs_total, 2);
        assert_eq!(stats.recs_udp, 1);
        assert_eq!(stats.recs_tcp, 1);
        assert_eq!(stats.recs_bf_total, 1);
        assert_eq!(stats.recs_bf_tcp, 1);
        assert_eq!(stats.bytes_total, 1500);
    }
}
