//! File-open configuration (spec §6's "File open/close with flags"),
//! grounded on `vector-buffers`'s `DiskBufferConfigBuilder::build()`: a
//! plain deserializable struct assembled via a builder that validates the
//! combination once, rather than re-checking preconditions on every call.

use std::path::PathBuf;

use serde::Deserialize;
use snafu::Snafu;

use crate::compression::CompressionAlgorithm;
use crate::error::Error;

/// How a file is opened (spec §6: "exactly one access mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    WriteTruncate,
    WriteAppend,
}

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("parameter '{param_name}' was invalid: {reason}"))]
    InvalidParameter { param_name: &'static str, reason: String },
}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        Error::argument(e.to_string())
    }
}

/// Default maximum size of one generated IPFIX Message (spec §4.8).
pub const DEFAULT_MSG_SIZE_MAX: u16 = 1400;
/// Hard cap on Message size: the field is a 16-bit length (RFC 7011 §3.1).
pub const MSG_SIZE_MAX_LIMIT: u16 = 65535;
/// Smallest Message size that can hold a header and at least one Set header.
const MSG_SIZE_MIN: u16 = 16 + 4;

/// Validated configuration for opening an FDS file (spec §6, §4.10, §4.11).
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub path: PathBuf,
    pub access_mode: AccessMode,
    /// Ignored on read and on append-of-an-existing-file (spec §6); only
    /// meaningful when truncate-creating a new file.
    pub compression: CompressionAlgorithm,
    pub async_io: bool,
    pub msg_size_max: u16,
    pub udp_lifetime_data: u16,
    pub udp_lifetime_opts: u16,
    pub snapshot_timeout: u16,
}

/// Builder for [`FileConfig`]; also directly `Deserialize`-able so a caller
/// can load these settings from their own configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfigBuilder {
    path: PathBuf,
    access_mode: AccessMode,
    #[serde(default)]
    compression: CompressionAlgorithm,
    #[serde(default = "default_async_io")]
    async_io: bool,
    #[serde(default)]
    msg_size_max: Option<u16>,
    #[serde(default)]
    udp_lifetime_data: u16,
    #[serde(default)]
    udp_lifetime_opts: u16,
    #[serde(default)]
    snapshot_timeout: u16,
}

fn default_async_io() -> bool {
    true
}

impl FileConfigBuilder {
    pub fn new<P: Into<PathBuf>>(path: P, access_mode: AccessMode) -> Self {
        FileConfigBuilder {
            path: path.into(),
            access_mode,
            compression: CompressionAlgorithm::None,
            async_io: true,
            msg_size_max: None,
            udp_lifetime_data: 0,
            udp_lifetime_opts: 0,
            snapshot_timeout: 0,
        }
    }

    pub fn compression(mut self, alg: CompressionAlgorithm) -> Self {
        self.compression = alg;
        self
    }

    pub fn async_io(mut self, enabled: bool) -> Self {
        self.async_io = enabled;
        self
    }

    pub fn msg_size_max(mut self, size: u16) -> Self {
        self.msg_size_max = Some(size);
        self
    }

    pub fn udp_lifetimes(mut self, data: u16, opts: u16) -> Self {
        self.udp_lifetime_data = data;
        self.udp_lifetime_opts = opts;
        self
    }

    pub fn snapshot_timeout(mut self, timeout: u16) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<FileConfig, BuildError> {
        let msg_size_max = self.msg_size_max.unwrap_or(DEFAULT_MSG_SIZE_MAX);
        if msg_size_max < MSG_SIZE_MIN {
            return Err(BuildError::InvalidParameter {
                param_name: "msg_size_max",
                reason: format!("must be at least {MSG_SIZE_MIN} bytes"),
            });
        }

        let compression = match self.access_mode {
            AccessMode::WriteTruncate => self.compression,
            // Ignored rather than rejected (spec §6): a reader and an
            // appender both learn the true algorithm from the file header.
            AccessMode::Read | AccessMode::WriteAppend => CompressionAlgorithm::None,
        };

        Ok(FileConfig {
            path: self.path,
            access_mode: self.access_mode,
            compression,
            async_io: self.async_io,
            msg_size_max,
            udp_lifetime_data: self.udp_lifetime_data,
            udp_lifetime_opts: self.udp_lifetime_opts,
            snapshot_timeout: self.snapshot_timeout,
        })
    }
}
