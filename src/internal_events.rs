//! Observability events emitted at the same points `vector-buffers`
//! instruments its own disk-backed buffer engine (file open/close, block
//! flush, block load, snapshot GC): purely additive counters and gauges,
//! never consulted by control flow.

use metrics::{counter, gauge};

pub struct DataBlockFlushed {
    pub odid: u32,
    pub records: u32,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

impl DataBlockFlushed {
    pub fn emit(&self) {
        let odid = self.odid.to_string();
        counter!("fds_file_blocks_flushed_total", "odid" => odid.clone()).increment(1);
        counter!("fds_file_records_written_total", "odid" => odid.clone()).increment(u64::from(self.records));
        counter!("fds_file_bytes_written_total", "odid" => odid).increment(self.compressed_bytes);
        tracing::debug!(
            odid = self.odid,
            records = self.records,
            uncompressed_bytes = self.uncompressed_bytes,
            compressed_bytes = self.compressed_bytes,
            "flushed data block"
        );
    }
}

pub struct DataBlockLoaded {
    pub odid: u32,
    pub records: u32,
    pub bytes: u64,
}

impl DataBlockLoaded {
    pub fn emit(&self) {
        let odid = self.odid.to_string();
        counter!("fds_file_blocks_loaded_total", "odid" => odid.clone()).increment(1);
        counter!("fds_file_records_read_total", "odid" => odid.clone()).increment(u64::from(self.records));
        counter!("fds_file_bytes_read_total", "odid" => odid).increment(self.bytes);
    }
}

pub struct TemplatesExpired {
    pub count: usize,
}

impl TemplatesExpired {
    pub fn emit(&self) {
        if self.count == 0 {
            return;
        }
        counter!("fds_file_templates_expired_total").increment(self.count as u64);
        tracing::debug!(count = self.count, "templates expired");
    }
}

pub struct GarbageCollected {
    pub snapshots: usize,
    pub templates: usize,
}

impl GarbageCollected {
    pub fn emit(&self) {
        counter!("fds_file_snapshots_collected_total").increment(self.snapshots as u64);
        counter!("fds_file_templates_collected_total").increment(self.templates as u64);
    }
}

pub struct ContentTableRebuilt {
    pub sessions: usize,
    pub data_blocks: usize,
    pub truncated_tail: bool,
}

impl ContentTableRebuilt {
    pub fn emit(&self) {
        counter!("fds_file_content_table_rebuilds_total").increment(1);
        if self.truncated_tail {
            tracing::warn!(
                sessions = self.sessions,
                data_blocks = self.data_blocks,
                "content table missing; rebuilt by scan and discarded a truncated tail"
            );
        } else {
            tracing::debug!(
                sessions = self.sessions,
                data_blocks = self.data_blocks,
                "content table missing; rebuilt by scan"
            );
        }
    }
}

pub struct FileOpened {
    pub access_mode: &'static str,
}

impl FileOpened {
    pub fn emit(&self) {
        gauge!("fds_file_open_handles", "mode" => self.access_mode).increment(1.0);
    }
}

pub struct FileClosed {
    pub access_mode: &'static str,
}

impl FileClosed {
    pub fn emit(&self) {
        gauge!("fds_file_open_handles", "mode" => self.access_mode).decrement(1.0);
    }
}
