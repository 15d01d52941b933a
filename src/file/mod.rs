//! The file-level API: header layout plus the reader/writer pair that open
//! an FDS file under one of the three access modes (spec §4.10, §4.11, §6).

pub mod header;
pub mod reader;
pub mod writer;
