//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate ultimately reports one of the
//! [`ErrorKind`] variants from spec §7. Individual subsystems define their
//! own `snafu`-derived error enums (see `template::manager::TemplateError`,
//! `block::templates::ParseError`, `file::writer::WriterError`,
//! `file::reader::ReaderError`) and fold them into [`Error`] so that callers
//! at the crate boundary only ever have to match on [`ErrorKind`].

use std::fmt;

use snafu::Snafu;

/// The taxonomy of error conditions a caller can observe (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A precondition was violated: missing working snapshot, invalid flag
    /// combination, unknown template type, context not selected, etc.
    Argument,
    /// The requested template, session, or historical time does not exist.
    NotFound,
    /// The operation is forbidden by the current session-type policy or
    /// file access mode.
    Denied,
    /// Data on the wire or on disk violates a format invariant.
    Format,
    /// I/O failure, allocation failure, compression failure, or an
    /// invariant was violated mid-operation. Once observed, the owning
    /// file handle is marked fatally broken.
    Internal,
    /// Normal iterator termination; not actually an error condition, but
    /// modeled as one so it can flow through the same `Result` channel.
    EndOfContext,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Argument => "argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::Denied => "denied",
            ErrorKind::Format => "format",
            ErrorKind::Internal => "internal",
            ErrorKind::EndOfContext => "end of context",
        };
        f.write_str(s)
    }
}

/// The crate's top-level error type.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("argument error: {message}"))]
    Argument { message: String },

    #[snafu(display("not found: {message}"))]
    NotFound { message: String },

    #[snafu(display("denied: {message}"))]
    Denied { message: String },

    #[snafu(display("format error: {message}"))]
    Format { message: String },

    #[snafu(display("internal error: {message}"))]
    Internal { message: String },

    #[snafu(display("i/o error: {source}"))]
    Io { source: std::io::Error },

    /// Not a failure; used so iterator-style `next_*` methods can return
    /// `Result<T, Error>` uniformly. Callers should treat this as "done".
    #[snafu(display("end of context"))]
    EndOfContext,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument { .. } => ErrorKind::Argument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Denied { .. } => ErrorKind::Denied,
            Error::Format { .. } => ErrorKind::Format,
            Error::Internal { .. } | Error::Io { .. } => ErrorKind::Internal,
            Error::EndOfContext => ErrorKind::EndOfContext,
        }
    }

    pub fn argument<S: Into<String>>(message: S) -> Self {
        Error::Argument {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn denied<S: Into<String>>(message: S) -> Self {
        Error::Denied {
            message: message.into(),
        }
    }

    pub fn format<S: Into<String>>(message: S) -> Self {
        Error::Format {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
