//! IPFIX (Options) Template parsing and the in-memory [`Template`] type
//! (spec §3 "Template", §4.5).

pub mod garbage;
pub mod manager;
pub mod snapshot;

use std::sync::Arc;

use bytes::Buf;

use crate::error::{Error, Result};
use crate::ie::{IeDefinition, IeManagerRef};

/// Sentinel field length meaning "variable-length", per RFC 7011 §3.2.
pub const VAR_IE_LEN: u16 = 0xFFFF;

/// The smallest valid Template ID; 0..255 are reserved by the protocol
/// (spec §3 Invariants).
pub const MIN_TEMPLATE_ID: u16 = 256;

/// Enterprise number marking the reverse direction of a biflow (RFC 5103).
pub const REVERSE_ENTERPRISE_NUMBER: u32 = 29305;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateType {
    Data,
    Options,
}

/// One field specifier in a template: `(enterprise_number, ie_id, length)`,
/// with `length == VAR_IE_LEN` meaning variable-length (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub enterprise_number: u32,
    pub ie_id: u16,
    pub length: u16,
    /// Whether this field is a scope field (Options Templates only).
    pub is_scope: bool,
    /// Semantic definition resolved from an external IE manager, if any was
    /// bound at parse/rebind time.
    pub ie: Option<IeDefinition>,
}

impl Field {
    pub fn is_variable_length(&self) -> bool {
        self.length == VAR_IE_LEN
    }

    pub fn is_reverse(&self) -> bool {
        self.enterprise_number == REVERSE_ENTERPRISE_NUMBER
    }
}

/// A parsed IPFIX (Options) Template (spec §3).
#[derive(Debug, Clone)]
pub struct Template {
    pub id: u16,
    pub template_type: TemplateType,
    pub fields: Vec<Field>,
    pub scope_field_count: u16,

    /// Minimum encoded record length: sum of fixed field lengths, plus one
    /// byte per variable-length field (the shortest possible length
    /// prefix).
    pub min_length: u32,

    pub has_variable_length: bool,
    pub has_reverse_ie: bool,
    pub has_structured_list: bool,
    pub has_flow_key: bool,
    pub flow_key: Option<u64>,

    /// Export Time (wall seconds) this template was first observed.
    pub first_seen: u32,
    /// Export Time this template was last refreshed.
    pub last_seen: u32,
    /// Export Time after which this template is no longer valid, if a
    /// lifetime is enabled for it.
    pub end_of_life: Option<u32>,

    /// Immutable copy of the template record exactly as received on the
    /// wire (big-endian IPFIX bytes, no FDS framing).
    pub raw: Arc<[u8]>,
}

impl PartialEq for Template {
    /// Bit-identical comparison per spec §4.1 ("same ID already exists...
    /// and it is bit-identical"): compares the raw wire bytes only.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.raw == other.raw
    }
}
impl Eq for Template {}

impl Template {
    pub fn data_field_count(&self) -> u16 {
        self.fields.len() as u16
    }

    /// True if this template's declared per-record length is fixed (no
    /// field is variable-length).
    pub fn is_fixed_length(&self) -> bool {
        !self.has_variable_length
    }

    /// Fixed total data length; only meaningful when `is_fixed_length()`.
    pub fn fixed_data_length(&self) -> u32 {
        self.fields.iter().map(|f| u32::from(f.length)).sum()
    }

    /// Parses an IPFIX (Options) Template record body (the bytes after the
    /// enclosing Set header), per spec §4.5 and RFC 7011 §3.2/§3.4.1.
    ///
    /// `kind` disambiguates Template Sets (flowset_id == 2) from Options
    /// Template Sets (flowset_id == 3), since the wire layout differs in
    /// whether a scope-field count is present.
    pub fn parse(
        kind: TemplateType,
        input: &[u8],
        now: u32,
        lifetime: u32,
        iemgr: &IeManagerRef,
    ) -> Result<(Self, usize)> {
        let mut buf = input;
        let start_len = buf.len();
        if buf.len() < 4 {
            return Err(Error::format("template record shorter than its header"));
        }

        let id = buf.get_u16();
        let field_count = buf.get_u16();
        if field_count == 0 {
            return Err(Error::format("template withdrawal record passed to parse"));
        }
        if id < MIN_TEMPLATE_ID {
            return Err(Error::format(format!(
                "template id {id} is reserved (must be >= {MIN_TEMPLATE_ID})"
            )));
        }

        let scope_field_count = match kind {
            TemplateType::Data => 0,
            TemplateType::Options => {
                if buf.len() < 2 {
                    return Err(Error::format("options template missing scope field count"));
                }
                let sfc = buf.get_u16();
                if sfc == 0 {
                    return Err(Error::format("options template scope field count must not be zero"));
                }
                sfc
            }
        };

        let mut fields = Vec::with_capacity(field_count as usize);
        for i in 0..field_count {
            if buf.len() < 4 {
                return Err(Error::format("template record truncated mid-field"));
            }
            let raw_id = buf.get_u16();
            let length = buf.get_u16();
            let enterprise_bit = raw_id & 0x8000 != 0;
            let ie_id = raw_id & 0x7FFF;
            let enterprise_number = if enterprise_bit {
                if buf.len() < 4 {
                    return Err(Error::format("field specifier missing enterprise number"));
                }
                buf.get_u32()
            } else {
                0
            };

            fields.push(Field {
                enterprise_number,
                ie_id,
                length,
                is_scope: i < scope_field_count,
                ie: iemgr.lookup(enterprise_number, ie_id),
            });
        }

        let consumed = start_len - buf.len();
        let raw: Arc<[u8]> = Arc::from(&input[..consumed]);

        let has_variable_length = fields.iter().any(Field::is_variable_length);
        let has_reverse_ie = fields.iter().any(Field::is_reverse);
        let has_structured_list = fields
            .iter()
            .any(|f| f.enterprise_number == 0 && matches!(f.ie_id, 292 | 293 | 291));
        let min_length = fields
            .iter()
            .map(|f| if f.is_variable_length() { 1 } else { u32::from(f.length) })
            .sum();

        let end_of_life = if lifetime > 0 { Some(now + lifetime) } else { None };

        Ok((
            Template {
                id,
                template_type: kind,
                fields,
                scope_field_count,
                min_length,
                has_variable_length,
                has_reverse_ie,
                has_structured_list,
                has_flow_key: false,
                flow_key: None,
                first_seen: now,
                last_seen: now,
                end_of_life,
                raw,
            },
            consumed,
        ))
    }

    /// Refreshes an identical redefinition: preserves `first_seen` and any
    /// attached flow-key, updates `last_seen`/`end_of_life` (spec §3, §4.1).
    pub fn refresh(&mut self, now: u32, lifetime: u32) {
        self.last_seen = now;
        self.end_of_life = if lifetime > 0 { Some(now + lifetime) } else { None };
    }

    /// Computes the encoded length of one Data Record against this
    /// template: fixed fields consume their declared width; variable-length
    /// fields are prefixed by a one-byte length, or `0xFF` followed by a
    /// big-endian two-byte length when the short form cannot express it
    /// (RFC 7011 §7). Shared by the Data Writer and Data Reader so both
    /// agree on where one record ends and the next begins.
    pub fn encoded_record_length(&self, data: &[u8]) -> Result<usize> {
        let mut offset = 0usize;
        for field in &self.fields {
            if field.length != VAR_IE_LEN {
                offset += usize::from(field.length);
                if offset > data.len() {
                    return Err(Error::format("data record shorter than its fixed fields"));
                }
                continue;
            }

            let Some(&first) = data.get(offset) else {
                return Err(Error::format("data record truncated at variable-length prefix"));
            };
            if first == 0xFF {
                let bytes = data
                    .get(offset + 1..offset + 3)
                    .ok_or_else(|| Error::format("data record truncated at extended length prefix"))?;
                let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
                offset += 3 + len;
            } else {
                offset += 1 + first as usize;
            }
            if offset > data.len() {
                return Err(Error::format("variable-length field exceeds data record"));
            }
        }
        Ok(offset)
    }
}

pub use TemplateType as Kind;
