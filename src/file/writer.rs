//! File Writer: owns an exclusively-locked FDS file and the per-`(session,
//! odid)` state needed to append Session, Templates, and Data blocks to it
//! in order, finishing with a Content Table and an up-to-date header (spec
//! §4.10, grounded on `File_writer.hpp`/`File_writer.cpp`).

use std::collections::{BTreeMap, HashMap};
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use crate::block::content_table::{ContentTable, DataRecord, SessionRecord};
use crate::block::session::{SessionBlock, SessionDescriptor};
use crate::block::templates::TemplatesBlock;
use crate::block::{data_block, data_writer::DataWriter, DATA_BLOCK_MAX_SIZE};
use crate::compression::CompressionAlgorithm;
use crate::config::{AccessMode, FileConfig};
use crate::error::{Error, Result};
use crate::ie::IeManagerRef;
use crate::file::header::{FileHeader, HEADER_SIZE};
use crate::internal_events::{ContentTableRebuilt, DataBlockFlushed, FileClosed, FileOpened};
use crate::io_request::{IoOutcome, IoRequest};
use crate::template::TemplateType;

struct WriterContext {
    templates: TemplatesBlock,
    templates_offset: Option<u64>,
    dirty: bool,
    data: DataWriter,
}

/// Writes Session, Templates, and Data blocks to one FDS file, in the
/// `WriteTruncate` or `WriteAppend` access modes (spec §4.10).
pub struct FileWriter {
    file: Arc<std::fs::File>,
    _lock: fslock::LockFile,
    async_io: bool,
    msg_size_max: u16,
    compression: CompressionAlgorithm,
    access_label: &'static str,

    header: FileHeader,
    sessions_by_descriptor: BTreeMap<SessionDescriptor, u16>,
    next_session_id: u16,
    table: ContentTable,
    next_offset: u64,

    contexts: HashMap<(u16, u32), WriterContext>,
    current: Option<(u16, u32)>,
    iemgr: Option<IeManagerRef>,
}

fn read_exact_at(file: &std::fs::File, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = file.read_at(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(Error::format("unexpected end of file"));
        }
        read += n;
    }
    Ok(buf)
}

fn lock_exclusive(path: &std::path::Path) -> Result<fslock::LockFile> {
    let mut lock = fslock::LockFile::open(path)?;
    if !lock.try_lock()? {
        return Err(Error::denied("file is already locked by another writer"));
    }
    Ok(lock)
}

impl FileWriter {
    /// Opens a file for writing per `config.access_mode` (spec §4.10, §6).
    /// `Read` is rejected; use [`crate::file::reader::FileReader`] instead.
    pub async fn open(config: FileConfig) -> Result<Self> {
        match config.access_mode {
            AccessMode::WriteTruncate => Self::open_truncate(config),
            AccessMode::WriteAppend => Self::open_append(config),
            AccessMode::Read => Err(Error::argument("FileWriter cannot open in Read mode")),
        }
    }

    fn open_truncate(config: FileConfig) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&config.path)?;
        let lock = lock_exclusive(&config.path)?;

        let header = FileHeader::new(config.compression);
        let mut header_buf = Vec::with_capacity(HEADER_SIZE);
        header.write_to(&mut header_buf);
        file.write_at(&header_buf, 0)?;

        FileOpened {
            access_mode: "write_truncate",
        }
        .emit();

        Ok(FileWriter {
            file: Arc::new(file),
            _lock: lock,
            async_io: config.async_io,
            msg_size_max: config.msg_size_max,
            compression: config.compression,
            access_label: "write_truncate",
            header,
            sessions_by_descriptor: BTreeMap::new(),
            next_session_id: 1,
            table: ContentTable::new(),
            next_offset: HEADER_SIZE as u64,
            contexts: HashMap::new(),
            current: None,
            iemgr: None,
        })
    }

    fn open_append(config: FileConfig) -> Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(&config.path)?;
        let lock = lock_exclusive(&config.path)?;

        let header_bytes = read_exact_at(&file, 0, HEADER_SIZE)?;
        let mut cursor = &header_bytes[..];
        let header = FileHeader::read_from(&mut cursor)?;

        let file_len = file.metadata()?.len();
        let (table, next_offset, rebuilt) = if header.table_offset != 0 && header.table_offset < file_len {
            let table_bytes = read_exact_at(&file, header.table_offset, (file_len - header.table_offset) as usize)?;
            let mut tcursor = &table_bytes[..];
            match ContentTable::read_from(&mut tcursor) {
                Ok(table) => (table, header.table_offset, false),
                Err(_) => ContentTable::rebuild_by_scan(&file, HEADER_SIZE as u64, file_len)?,
            }
        } else {
            ContentTable::rebuild_by_scan(&file, HEADER_SIZE as u64, file_len)?
        };

        if rebuilt {
            ContentTableRebuilt {
                sessions: table.sessions.len(),
                data_blocks: table.data_blocks.len(),
                truncated_tail: next_offset < file_len,
            }
            .emit();
        }

        let mut sessions_by_descriptor = BTreeMap::new();
        let mut max_session_id = 0u16;
        for rec in &table.sessions {
            let bytes = read_exact_at(&file, rec.offset, rec.length as usize)?;
            let mut c = &bytes[..];
            let block = SessionBlock::read_from(&mut c)?;
            sessions_by_descriptor.insert(block.descriptor, block.session_id);
            max_session_id = max_session_id.max(block.session_id);
        }

        FileOpened {
            access_mode: "write_append",
        }
        .emit();

        let compression = header.compression;
        Ok(FileWriter {
            file: Arc::new(file),
            _lock: lock,
            async_io: config.async_io,
            msg_size_max: config.msg_size_max,
            compression,
            access_label: "write_append",
            header,
            sessions_by_descriptor,
            next_session_id: max_session_id.saturating_add(1).max(1),
            table,
            next_offset,
            contexts: HashMap::new(),
            current: None,
            iemgr: None,
        })
    }

    /// Rebinds every per-context Templates Block to a new IE source (spec
    /// §4.1's `set_iemgr`, propagated the way [`crate::block::templates::TemplatesBlock`]
    /// requires).
    pub fn set_iemgr(&mut self, iemgr: IeManagerRef) -> Result<()> {
        for ctx in self.contexts.values_mut() {
            ctx.templates.set_iemgr(Arc::clone(&iemgr))?;
        }
        self.iemgr = Some(iemgr);
        Ok(())
    }

    /// Registers a Transport Session, returning its internal Session ID.
    /// Descriptors are deduplicated: re-adding an already-known descriptor
    /// returns the same ID without writing a second Session Block.
    pub async fn session_add(&mut self, descriptor: SessionDescriptor) -> Result<u16> {
        if let Some(&id) = self.sessions_by_descriptor.get(&descriptor) {
            return Ok(id);
        }

        let id = self.next_session_id;
        self.next_session_id = self
            .next_session_id
            .checked_add(1)
            .ok_or_else(|| Error::internal("session id space exhausted"))?;

        let block = SessionBlock {
            session_id: id,
            descriptor,
            feature_flags: 0,
        };
        let mut buf = Vec::new();
        block.write_to(&mut buf);
        let length = block.encoded_len();
        let offset = self.write_block(buf).await?;

        self.table.add_session(SessionRecord {
            offset,
            length,
            session_id: id,
            flags: 0,
        });
        self.sessions_by_descriptor.insert(descriptor, id);
        Ok(id)
    }

    /// Selects the `(session_id, odid, export_time)` context subsequent
    /// [`FileWriter::tmplt_add`]/[`FileWriter::write_rec`] calls apply to,
    /// creating its writer state on first use (spec §4.10's `select_ctx`).
    pub fn select_ctx(&mut self, session_id: u16, odid: u32, export_time: u32) -> Result<()> {
        if self.table.session_by_id(session_id).is_none() {
            return Err(Error::argument("unknown session id; call session_add first"));
        }

        let key = (session_id, odid);
        if !self.contexts.contains_key(&key) {
            let mut templates = TemplatesBlock::new(session_id, odid);
            if let Some(iemgr) = &self.iemgr {
                templates.set_iemgr(Arc::clone(iemgr))?;
            }
            let data = DataWriter::new(odid, DATA_BLOCK_MAX_SIZE, self.msg_size_max);
            self.contexts.insert(
                key,
                WriterContext {
                    templates,
                    templates_offset: None,
                    dirty: true,
                    data,
                },
            );
        }

        self.contexts.get_mut(&key).unwrap().data.set_export_time(export_time);
        self.current = Some(key);
        Ok(())
    }

    fn current_key(&self) -> Result<(u16, u32)> {
        self.current.ok_or_else(|| Error::argument("no context selected; call select_ctx first"))
    }

    /// A snapshot of the statistics accumulated so far, including any data
    /// still buffered in an in-progress Data Block that has not been flushed
    /// yet (spec §6).
    pub fn stats(&self) -> crate::stats::Stats {
        let mut stats = self.header.stats;
        for ctx in self.contexts.values() {
            stats += ctx.data.stats();
        }
        stats
    }

    /// Adds or redefines a template in the currently selected context.
    /// Bit-identical redefinitions are a no-op that does not dirty the
    /// context (the Templates Block already on disk still matches); a
    /// genuine redefinition of an id that already has buffered records
    /// flushes the pending Data Block (and the Templates Block underneath
    /// it) first, so those records stay readable against the template that
    /// actually encoded them, guaranteeing template-before-data (spec
    /// §4.10).
    pub async fn tmplt_add(&mut self, kind: TemplateType, raw: &[u8]) -> Result<()> {
        let key = self.current_key()?;
        if raw.len() < 2 {
            return Err(Error::format("template record too short to contain an id"));
        }
        let id = u16::from_be_bytes([raw[0], raw[1]]);

        let ctx = self.contexts.get(&key).unwrap();
        let redefines_existing = ctx
            .templates
            .get_template(id)
            .ok()
            .map(|t| *t.raw != *raw)
            .unwrap_or(false);
        if redefines_existing && ctx.data.count() > 0 {
            self.flush_data_for(key).await?;
        }

        let ctx = self.contexts.get_mut(&key).unwrap();
        let before = ctx.templates.get_template(id).ok();
        ctx.templates.add(kind, raw)?;
        let after = ctx.templates.get_template(id).ok();

        let changed = match (&before, &after) {
            (Some(b), Some(a)) => !Arc::ptr_eq(b, a),
            _ => true,
        };
        if changed {
            ctx.dirty = true;
        }
        Ok(())
    }

    pub fn tmplt_remove(&mut self, id: u16) -> Result<()> {
        let key = self.current_key()?;
        let ctx = self.contexts.get_mut(&key).unwrap();
        ctx.templates.remove(id)?;
        ctx.dirty = true;
        Ok(())
    }

    /// Writes a Data Record against the currently selected context's
    /// template `id`, flushing the in-progress Data Block first if it has
    /// no room left (spec §4.10).
    pub async fn write_rec(&mut self, id: u16, data: &[u8], proto: u8, bytes: u64, pkts: u64) -> Result<()> {
        let key = self.current_key()?;
        let template = self.contexts.get(&key).unwrap().templates.get_template(id)?;
        let needed = template.encoded_record_length(data)?;

        if self.contexts.get(&key).unwrap().data.remains() < needed {
            self.flush_data_for(key).await?;
        }

        self.contexts
            .get_mut(&key)
            .unwrap()
            .data
            .add(&template, data, proto, bytes, pkts)?;
        Ok(())
    }

    async fn flush_templates_for(&mut self, key: (u16, u32)) -> Result<()> {
        if !self.contexts.get(&key).unwrap().dirty {
            return Ok(());
        }
        let mut buf = Vec::new();
        self.contexts.get_mut(&key).unwrap().templates.write_to(&mut buf)?;
        let offset = self.write_block(buf).await?;

        let ctx = self.contexts.get_mut(&key).unwrap();
        ctx.templates_offset = Some(offset);
        ctx.dirty = false;
        Ok(())
    }

    async fn flush_data_for(&mut self, key: (u16, u32)) -> Result<()> {
        let record_count = self.contexts.get(&key).unwrap().data.count();
        if record_count == 0 {
            return Ok(());
        }

        self.flush_templates_for(key).await?;

        let ctx = self.contexts.get_mut(&key).unwrap();
        let templates_offset = ctx.templates_offset.unwrap_or(0);
        let odid = ctx.data.odid();
        let (raw, stats) = ctx.data.finish();

        let block_bytes = data_block::encode(odid, key.0, self.compression, &raw)?;
        let length = block_bytes.len() as u64;
        let uncompressed_bytes = raw.len() as u64;
        let offset = self.write_block(block_bytes).await?;

        self.table.add_data_block(DataRecord {
            offset,
            length,
            offset_tmplts: templates_offset,
            odid,
            session_id: key.0,
            flags: 0,
        });
        self.header.stats += stats;

        DataBlockFlushed {
            odid,
            records: record_count,
            uncompressed_bytes,
            compressed_bytes: length,
        }
        .emit();
        Ok(())
    }

    /// Flushes every context's pending Data Block (and any dirty Templates
    /// Block underneath it) without closing the file.
    pub async fn flush(&mut self) -> Result<()> {
        let keys: Vec<_> = self.contexts.keys().copied().collect();
        for key in keys {
            self.flush_data_for(key).await?;
        }
        Ok(())
    }

    async fn write_block(&mut self, bytes: Vec<u8>) -> Result<u64> {
        let offset = self.next_offset;
        let len = bytes.len() as u64;
        let req = if self.async_io {
            IoRequest::write_async(Arc::clone(&self.file), offset, bytes)
        } else {
            IoRequest::write_sync(Arc::clone(&self.file), offset, bytes)
        };
        match req.wait().await? {
            IoOutcome::Write { transferred } if transferred as u64 == len => {
                self.next_offset += len;
                Ok(offset)
            }
            IoOutcome::Write { .. } => Err(Error::internal("short write to FDS file")),
            IoOutcome::Read { .. } => unreachable!("write_block only issues writes"),
        }
    }

    /// Flushes everything (including Templates Blocks with no pending data,
    /// so no definition is lost), writes the Content Table, and rewrites the
    /// file header with the final `table_offset` and statistics (spec
    /// §4.10).
    pub async fn close(mut self) -> Result<()> {
        let keys: Vec<_> = self.contexts.keys().copied().collect();
        for key in keys {
            self.flush_templates_for(key).await?;
            self.flush_data_for(key).await?;
        }

        let table_offset = self.next_offset;
        let mut table_buf = Vec::new();
        self.table.write_to(&mut table_buf);
        self.write_block(table_buf).await?;

        self.header.table_offset = table_offset;
        let mut header_buf = Vec::with_capacity(HEADER_SIZE);
        self.header.write_to(&mut header_buf);
        self.file.write_at(&header_buf, 0)?;

        FileClosed {
            access_mode: self.access_label,
        }
        .emit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::session::SessionProto;
    use crate::ie::null_iemgr;

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor {
            ip_src: [1; 16],
            ip_dst: [2; 16],
            port_src: 1000,
            port_dst: 2055,
            proto: SessionProto::Udp,
        }
    }

    fn data_template_bytes(id: u16) -> Vec<u8> {
        data_template_bytes_with_len(id, 4)
    }

    fn data_template_bytes_with_len(id: u16, field_len: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&8u16.to_be_bytes());
        body.extend_from_slice(&field_len.to_be_bytes());
        body
    }

    #[tokio::test]
    async fn writes_session_templates_and_data_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        let config = crate::config::FileConfigBuilder::new(&path, AccessMode::WriteTruncate)
            .build()
            .unwrap();

        let mut writer = FileWriter::open(config).await.unwrap();
        writer.set_iemgr(null_iemgr()).unwrap();
        let sid = writer.session_add(descriptor()).await.unwrap();
        writer.select_ctx(sid, 1, 1000).unwrap();
        writer.tmplt_add(TemplateType::Data, &data_template_bytes(300)).await.unwrap();
        writer.write_rec(300, &[1, 2, 3, 4], 17, 4, 1).await.unwrap();
        writer.close().await.unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        assert!(len > HEADER_SIZE as u64);
    }

    #[tokio::test]
    async fn session_add_is_idempotent_for_same_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        let config = crate::config::FileConfigBuilder::new(&path, AccessMode::WriteTruncate)
            .build()
            .unwrap();
        let mut writer = FileWriter::open(config).await.unwrap();
        let a = writer.session_add(descriptor()).await.unwrap();
        let b = writer.session_add(descriptor()).await.unwrap();
        assert_eq!(a, b);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn append_rebuilds_content_table_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");

        let config = crate::config::FileConfigBuilder::new(&path, AccessMode::WriteTruncate)
            .build()
            .unwrap();
        let mut writer = FileWriter::open(config).await.unwrap();
        writer.set_iemgr(null_iemgr()).unwrap();
        let sid = writer.session_add(descriptor()).await.unwrap();
        writer.select_ctx(sid, 1, 1000).unwrap();
        writer.tmplt_add(TemplateType::Data, &data_template_bytes(300)).await.unwrap();
        writer.write_rec(300, &[1, 2, 3, 4], 17, 4, 1).await.unwrap();
        writer.flush().await.unwrap();
        // Drop without calling close(): table_offset stays 0 in the header,
        // forcing the next open to rebuild by scanning.
        drop(writer);

        let config = crate::config::FileConfigBuilder::new(&path, AccessMode::WriteAppend)
            .build()
            .unwrap();
        let mut writer = FileWriter::open(config).await.unwrap();
        assert_eq!(writer.table.data_blocks.len(), 1);
        assert_eq!(writer.table.sessions.len(), 1);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn redefining_a_template_with_pending_records_flushes_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        let config = crate::config::FileConfigBuilder::new(&path, AccessMode::WriteTruncate)
            .build()
            .unwrap();

        let mut writer = FileWriter::open(config).await.unwrap();
        writer.set_iemgr(null_iemgr()).unwrap();
        let sid = writer.session_add(descriptor()).await.unwrap();
        writer.select_ctx(sid, 1, 1000).unwrap();
        writer.tmplt_add(TemplateType::Data, &data_template_bytes(300)).await.unwrap();
        for _ in 0..100 {
            writer.write_rec(300, &[1, 2, 3, 4], 17, 4, 1).await.unwrap();
        }

        // A non-identical redefinition of 300 with records already buffered
        // must flush the old layout's Data (and Templates) block first.
        writer
            .tmplt_add(TemplateType::Data, &data_template_bytes_with_len(300, 8))
            .await
            .unwrap();
        assert_eq!(
            writer.contexts.get(&(sid, 1)).unwrap().data.count(),
            0,
            "redefinition must flush the old records before replacing the template"
        );

        for _ in 0..100 {
            writer.write_rec(300, &[0; 8], 17, 8, 1).await.unwrap();
        }
        writer.close().await.unwrap();

        assert!(std::fs::metadata(&path).unwrap().len() > HEADER_SIZE as u64);
    }
}
