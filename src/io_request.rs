//! I/O Request: a single pending read or write on a file offset (spec §4.4).
//!
//! Sync and async variants are modeled as a small closed enum rather than a
//! trait object (design note §9 calls this out explicitly): the set of
//! variants is fixed and known up front, and a tagged enum keeps dispatch
//! flat instead of boxing a `dyn` future for every request.
//!
//! The synchronous variant is lazy: constructing it only records the
//! requested operation; `wait()` performs the positional `pread`/`pwrite`.
//! The asynchronous variant is eager: it immediately hands the positional
//! I/O to `tokio::task::spawn_blocking` (there is no portable safe async
//! `pread`/`pwrite` in the `tokio` feature set we depend on) and `wait()`
//! simply joins that task.

use std::os::unix::fs::FileExt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// A request to read `size` bytes starting at `offset`, or to write the
/// bytes already present in an owned buffer starting at `offset`.
pub enum IoRequest {
    SyncRead {
        file: Arc<std::fs::File>,
        offset: u64,
        size: usize,
    },
    SyncWrite {
        file: Arc<std::fs::File>,
        offset: u64,
        buf: Vec<u8>,
    },
    AsyncRead {
        handle: JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
    },
    AsyncWrite {
        handle: JoinHandle<std::io::Result<usize>>,
    },
}

/// Outcome of an I/O Request: bytes transferred, and for reads, the buffer
/// that was filled.
pub enum IoOutcome {
    Read { buf: Vec<u8>, transferred: usize },
    Write { transferred: usize },
}

impl IoRequest {
    /// Builds a lazy synchronous read request. Nothing happens until
    /// [`IoRequest::wait`] is called.
    pub fn read_sync(file: Arc<std::fs::File>, offset: u64, size: usize) -> Self {
        IoRequest::SyncRead { file, offset, size }
    }

    /// Builds a lazy synchronous write request.
    pub fn write_sync(file: Arc<std::fs::File>, offset: u64, buf: Vec<u8>) -> Self {
        IoRequest::SyncWrite { file, offset, buf }
    }

    /// Builds an eager asynchronous read request: the OS read is initiated
    /// immediately on a blocking-pool thread.
    pub fn read_async(file: Arc<std::fs::File>, offset: u64, size: usize) -> Self {
        let handle = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; size];
            let transferred = file.read_at(&mut buf, offset)?;
            Ok((buf, transferred))
        });
        IoRequest::AsyncRead { handle }
    }

    /// Builds an eager asynchronous write request: the OS write is
    /// initiated immediately on a blocking-pool thread. The caller must not
    /// touch `buf` again; it has been moved into the pending request.
    pub fn write_async(file: Arc<std::fs::File>, offset: u64, buf: Vec<u8>) -> Self {
        let handle = tokio::task::spawn_blocking(move || file.write_at(&buf, offset));
        IoRequest::AsyncWrite { handle }
    }

    /// Blocks until the operation completes, returning the transferred
    /// bytes (and, for reads, the filled buffer).
    pub async fn wait(self) -> Result<IoOutcome> {
        match self {
            IoRequest::SyncRead { file, offset, size } => {
                let mut buf = vec![0u8; size];
                let transferred = file.read_at(&mut buf, offset)?;
                Ok(IoOutcome::Read { buf, transferred })
            }
            IoRequest::SyncWrite { file, offset, buf } => {
                let transferred = file.write_at(&buf, offset)?;
                Ok(IoOutcome::Write { transferred })
            }
            IoRequest::AsyncRead { handle } => {
                let (buf, transferred) = handle
                    .await
                    .map_err(|e| Error::internal(format!("async read task panicked: {e}")))??;
                Ok(IoOutcome::Read { buf, transferred })
            }
            IoRequest::AsyncWrite { handle } => {
                let transferred = handle
                    .await
                    .map_err(|e| Error::internal(format!("async write task panicked: {e}")))??;
                Ok(IoOutcome::Write { transferred })
            }
        }
    }

    /// Best-effort cancellation. Guarantees that after this returns, the
    /// buffer backing this request is no longer in use by the OS (spec
    /// §4.4, §5): for the async variants, this aborts the blocking task and
    /// joins it so the kernel is done touching the buffer before we return.
    pub async fn cancel(self) {
        match self {
            IoRequest::AsyncRead { handle } => {
                handle.abort();
                let _ = handle.await;
            }
            IoRequest::AsyncWrite { handle } => {
                handle.abort();
                let _ = handle.await;
            }
            // Synchronous requests never started until `wait()`; dropping
            // them is already a clean cancellation.
            IoRequest::SyncRead { .. } | IoRequest::SyncWrite { .. } => {}
        }
    }
}
