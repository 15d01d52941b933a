//! Reader and writer for the FDS on-disk file format: a random-access
//! container for IPFIX (RFC 7011) flow records, plus the time-indexed
//! Template Manager that backs both live IPFIX sessions and file playback
//! (spec §1, §4, §6).
//!
//! The crate is organized as:
//!
//! - [`template`]: the (Options) Template type, the time-indexed
//!   [`template::manager::TemplateManager`], and the copy-on-write
//!   [`template::snapshot::Snapshot`] it maintains.
//! - [`block`]: on-disk framing for each block type (Session, Templates,
//!   Data, Content Table) and the Data Block reader/writer.
//! - [`file`]: [`file::writer::FileWriter`] and [`file::reader::FileReader`],
//!   the two entry points that tie blocks together into a whole file.
//! - [`config`], [`compression`], [`error`], [`stats`], [`ie`],
//!   [`io_request`]: the ambient configuration, compression, error,
//!   statistics, external-IE-source, and positional-I/O plumbing shared by
//!   the file reader and writer.
//!
//! Parsing Information Element XML metadata is out of scope (spec §1); this
//! crate only consumes one through [`ie::IeSource`].

pub mod block;
pub mod compression;
pub mod config;
pub mod error;
pub mod file;
pub mod ie;
pub mod internal_events;
pub mod io_request;
pub mod stats;
pub mod template;

pub use block::data_reader::{DataRecord, DataRecordContext};
pub use config::{AccessMode, FileConfig, FileConfigBuilder};
pub use error::{Error, ErrorKind, Result};
pub use file::reader::{FileReader, ReadFilter};
pub use file::writer::FileWriter;
pub use ie::{IeDefinition, IeManagerRef, IeSource};
pub use stats::Stats;
pub use template::{Field, Template, TemplateType};
