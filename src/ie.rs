//! External collaborator interface: the Information Element definition
//! manager.
//!
//! The XML-backed IE metadata lookup itself is explicitly out of scope for
//! this crate (spec §1). What lives here is the narrow seam the Template
//! Manager and Template Block need in order to bind parsed template fields
//! to semantic definitions, and to know when to rebind (`set_iemgr`).

use std::fmt;
use std::sync::Arc;

/// Minimal description of an Information Element, as resolved by an
/// external `IeSource`. Only the attributes the file/template subsystems
/// need to reason about are modeled; full semantic metadata (name, XML
/// provenance, etc.) lives in the external IE manager this crate only
/// consumes through [`IeSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IeDefinition {
    pub enterprise_id: u32,
    pub element_id: u16,
    /// True if this IE is the reverse-direction counterpart of another
    /// (biflow, enterprise number 29305).
    pub is_reverse: bool,
    /// The element ID of the forward-direction counterpart, if this is a
    /// reverse element, or vice versa.
    pub paired_id: Option<u16>,
}

/// The seam to an external Information Element manager.
///
/// Implementations are expected to be backed by the XML configuration
/// described in spec §1 ("out of scope... referenced by well-defined
/// interfaces"). This crate never constructs one; it only stores an
/// `Arc<dyn IeSource>` handed in via `set_iemgr`.
pub trait IeSource: Send + Sync + fmt::Debug {
    /// Looks up the definition of `(enterprise_id, element_id)`, if known.
    fn lookup(&self, enterprise_id: u32, element_id: u16) -> Option<IeDefinition>;
}

/// A no-op source used when no IE manager has been configured. All lookups
/// return `None`, matching the "field cannot be properly interpreted"
/// behavior documented in `template_mgr.h`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIeSource;

impl IeSource for NullIeSource {
    fn lookup(&self, _enterprise_id: u32, _element_id: u16) -> Option<IeDefinition> {
        None
    }
}

pub type IeManagerRef = Arc<dyn IeSource>;

pub fn null_iemgr() -> IeManagerRef {
    Arc::new(NullIeSource)
}
