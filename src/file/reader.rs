//! File Reader: replays Data Records out of an FDS file in on-disk order,
//! resolving each one against the Templates Block that was current for its
//! `(session_id, odid)` pair at write time (spec §4.11, grounded on
//! `File_reader.hpp`/`File_reader.cpp`).

use std::collections::{HashMap, HashSet};
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use crate::block::content_table::ContentTable;
use crate::block::data_block;
use crate::block::data_reader::{DataReader, DataRecord};
use crate::block::session::SessionDescriptor;
use crate::block::session::SessionBlock;
use crate::block::templates::TemplatesBlock;
use crate::block::{BlockHeader, BLOCK_HEADER_SIZE};
use crate::compression::CompressionAlgorithm;
use crate::config::{AccessMode, FileConfig};
use crate::error::{Error, Result};
use crate::file::header::{FileHeader, HEADER_SIZE};
use crate::ie::IeManagerRef;
use crate::internal_events::{ContentTableRebuilt, DataBlockLoaded, FileClosed, FileOpened};
use crate::io_request::{IoOutcome, IoRequest};
use crate::stats::Stats;
use crate::template::snapshot::Snapshot;

/// Session/ODID acceptance filter for playback (spec §4.11's
/// `fds_file_read_sfilter`): three OR-combined sets. A filter with all three
/// sets empty accepts every data block.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    /// Accept every ODID for these Session IDs.
    pub sids: HashSet<u16>,
    /// Accept every Session ID for these ODIDs.
    pub odids: HashSet<u32>,
    /// Accept only these explicit `(session_id, odid)` pairs.
    pub pairs: HashSet<(u16, u32)>,
}

impl ReadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_sid(mut self, sid: u16) -> Self {
        self.sids.insert(sid);
        self
    }

    pub fn accept_odid(mut self, odid: u32) -> Self {
        self.odids.insert(odid);
        self
    }

    pub fn accept_pair(mut self, sid: u16, odid: u32) -> Self {
        self.pairs.insert((sid, odid));
        self
    }

    fn is_empty(&self) -> bool {
        self.sids.is_empty() && self.odids.is_empty() && self.pairs.is_empty()
    }

    fn accepts(&self, sid: u16, odid: u32) -> bool {
        self.sids.contains(&sid) || self.odids.contains(&odid) || self.pairs.contains(&(sid, odid))
    }
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

/// Reads Session, Templates, and Data blocks back out of one FDS file,
/// always in `AccessMode::Read` (spec §4.11, §6).
pub struct FileReader {
    file: Arc<std::fs::File>,
    async_io: bool,
    header: FileHeader,
    table: ContentTable,
    sessions: HashMap<u16, SessionDescriptor>,
    templates_cache: HashMap<u64, Arc<Snapshot>>,
    iemgr: IeManagerRef,

    filter: ReadFilter,
    /// Indices into `table.data_blocks` that pass `filter`, in file order.
    matching: Vec<usize>,
    cursor: usize,

    current: Option<DataReader>,
    /// `(odid, bytes, records yielded so far)` for the currently open block,
    /// so [`DataBlockLoaded`] can be emitted with an accurate record count
    /// once the block is exhausted rather than guessed at open time.
    current_meta: Option<(u32, u64, u32)>,
    pending: Option<(usize, IoRequest)>,
}

impl FileReader {
    /// Opens a file for reading. Only `AccessMode::Read` is accepted; use
    /// [`crate::file::writer::FileWriter`] to write or append.
    pub async fn open(config: FileConfig, iemgr: IeManagerRef) -> Result<Self> {
        if config.access_mode != AccessMode::Read {
            return Err(Error::argument("FileReader can only open in Read mode"));
        }

        let file = std::fs::File::open(&config.path)?;

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

        let mut sessions = HashMap::new();
        for rec in &table.sessions {
            let bytes = read_exact_at(&file, rec.offset, rec.length as usize)?;
            let mut c = &bytes[..];
            let block = SessionBlock::read_from(&mut c)?;
            sessions.insert(block.session_id, block.descriptor);
        }

        FileOpened { access_mode: "read" }.emit();

        let matching: Vec<usize> = (0..table.data_blocks.len()).collect();
        Ok(FileReader {
            file: Arc::new(file),
            async_io: config.async_io,
            header,
            table,
            sessions,
            templates_cache: HashMap::new(),
            iemgr,
            filter: ReadFilter::default(),
            matching,
            cursor: 0,
            current: None,
            current_meta: None,
            pending: None,
        })
    }

    pub fn compression(&self) -> CompressionAlgorithm {
        self.header.compression
    }

    /// Every Transport Session recorded in this file, by internal Session ID.
    pub fn sessions(&self) -> &HashMap<u16, SessionDescriptor> {
        &self.sessions
    }

    /// Rebinds the Information Element source used to resolve template
    /// fields. Already-parsed Templates Blocks were bound to the old source,
    /// so the cache is dropped and playback restarts from the beginning
    /// (spec §4.1's `set_iemgr`, §4.11).
    pub fn set_iemgr(&mut self, iemgr: IeManagerRef) {
        self.iemgr = iemgr;
        self.templates_cache.clear();
        self.rewind();
    }

    /// Restricts playback to data blocks accepted by `filter`'s OR-combined
    /// sid/odid/pair sets, and rewinds.
    pub fn set_filter(&mut self, filter: ReadFilter) {
        self.filter = filter;
        self.rebuild_matching();
        self.rewind();
    }

    /// Removes any session/ODID filter, accepting every data block again.
    pub fn clear_filter(&mut self) {
        self.filter = ReadFilter::default();
        self.rebuild_matching();
        self.rewind();
    }

    fn rebuild_matching(&mut self) {
        self.matching = self
            .table
            .data_blocks
            .iter()
            .enumerate()
            .filter(|(_, r)| self.filter.is_empty() || self.filter.accepts(r.session_id, r.odid))
            .map(|(i, _)| i)
            .collect();
    }

    /// A snapshot of the statistics accumulated across every Data Block
    /// written to this file, as recorded in the file header (spec §6).
    pub fn stats(&self) -> Stats {
        self.header.stats
    }

    /// Resets playback to the first accepted data block. Any in-flight
    /// prefetch is simply dropped; `rewind` is synchronous and does not wait
    /// for the abandoned read to finish.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.current = None;
        self.current_meta = None;
        self.pending = None;
    }

    fn snapshot_for(&mut self, offset: u64) -> Result<Arc<Snapshot>> {
        if offset == 0 {
            return Err(Error::not_found("no templates block precedes this data block"));
        }
        if let Some(snap) = self.templates_cache.get(&offset) {
            return Ok(Arc::clone(snap));
        }

        let hdr_bytes = read_exact_at(&self.file, offset, BLOCK_HEADER_SIZE)?;
        let mut c = &hdr_bytes[..];
        let header = BlockHeader::read_from(&mut c)?;
        let body = read_exact_at(&self.file, offset, header.length as usize)?;
        let mut bc = &body[..];
        let mut block = TemplatesBlock::read_from(&mut bc, &self.iemgr)?;
        let snapshot = block.snapshot()?;

        self.templates_cache.insert(offset, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Issues (without awaiting) a read for the data block at `matching[idx]`
    /// if nothing is already pending for it.
    fn ensure_pending(&mut self, idx: usize) {
        if idx >= self.matching.len() {
            return;
        }
        if let Some((pending_idx, _)) = &self.pending {
            if *pending_idx == idx {
                return;
            }
        }
        let rec = self.table.data_blocks[self.matching[idx]];
        let req = if self.async_io {
            IoRequest::read_async(Arc::clone(&self.file), rec.offset, rec.length as usize)
        } else {
            IoRequest::read_sync(Arc::clone(&self.file), rec.offset, rec.length as usize)
        };
        self.pending = Some((idx, req));
    }

    async fn take_block(&mut self, idx: usize) -> Result<DataReader> {
        let bytes = match self.pending.take() {
            Some((pending_idx, req)) if pending_idx == idx => match req.wait().await? {
                IoOutcome::Read { buf, transferred } => {
                    let rec = self.table.data_blocks[self.matching[idx]];
                    if (transferred as u64) < rec.length {
                        return Err(Error::format("short read of data block"));
                    }
                    buf
                }
                IoOutcome::Write { .. } => unreachable!("take_block only issues reads"),
            },
            Some((_, stale)) => {
                stale.cancel().await;
                let rec = self.table.data_blocks[self.matching[idx]];
                read_exact_at(&self.file, rec.offset, rec.length as usize)?
            }
            None => {
                let rec = self.table.data_blocks[self.matching[idx]];
                read_exact_at(&self.file, rec.offset, rec.length as usize)?
            }
        };

        let mut cursor = &bytes[..];
        let decoded = data_block::decode(&mut cursor)?;
        let rec = self.table.data_blocks[self.matching[idx]];
        let snapshot = self.snapshot_for(rec.offset_tmplts)?;

        self.current_meta = Some((decoded.odid, decoded.payload.len() as u64, 0));
        Ok(DataReader::new(decoded.payload, snapshot, decoded.session_id, decoded.odid))
    }

    fn finish_current_block(&mut self) {
        if let Some((odid, bytes, records)) = self.current_meta.take() {
            DataBlockLoaded { odid, records, bytes }.emit();
        }
    }

    /// Reads the next Data Record in file order among the blocks accepted by
    /// the current filter, or `Ok(None)` once every accepted block has been
    /// exhausted.
    pub async fn read_rec(&mut self) -> Result<Option<DataRecord>> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                if let Some(result) = reader.next() {
                    if result.is_ok() {
                        if let Some((_, _, records)) = self.current_meta.as_mut() {
                            *records += 1;
                        }
                    }
                    return result.map(Some);
                }
                self.current = None;
                self.finish_current_block();
            }

            if self.cursor >= self.matching.len() {
                return Ok(None);
            }

            let idx = self.cursor;
            self.ensure_pending(idx);
            let reader = self.take_block(idx).await?;
            self.current = Some(reader);
            self.cursor += 1;
            self.ensure_pending(self.cursor);
        }
    }

    /// Closes the reader. There is no file-level state to flush back; this
    /// exists for symmetry with [`crate::file::writer::FileWriter::close`]
    /// and to emit the matching lifecycle event.
    pub fn close(self) {
        FileClosed { access_mode: "read" }.emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::session::SessionProto;
    use crate::config::FileConfigBuilder;
    use crate::file::writer::FileWriter;
    use crate::ie::null_iemgr;
    use crate::template::TemplateType;

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
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&8u16.to_be_bytes());
        body.extend_from_slice(&4u16.to_be_bytes());
        body
    }

    async fn write_sample(path: &std::path::Path) {
        let config = FileConfigBuilder::new(path, AccessMode::WriteTruncate).build().unwrap();
        let mut writer = FileWriter::open(config).await.unwrap();
        writer.set_iemgr(null_iemgr()).unwrap();
        let sid = writer.session_add(descriptor()).await.unwrap();
        writer.select_ctx(sid, 1, 1000).unwrap();
        writer.tmplt_add(TemplateType::Data, &data_template_bytes(300)).await.unwrap();
        writer.write_rec(300, &[1, 2, 3, 4], 17, 4, 1).await.unwrap();
        writer.write_rec(300, &[5, 6, 7, 8], 17, 4, 1).await.unwrap();
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn reads_back_every_record_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        write_sample(&path).await;

        let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
        let mut reader = FileReader::open(config, null_iemgr()).await.unwrap();

        let first = reader.read_rec().await.unwrap().unwrap();
        assert_eq!(first.data, vec![1, 2, 3, 4]);
        let second = reader.read_rec().await.unwrap().unwrap();
        assert_eq!(second.data, vec![5, 6, 7, 8]);
        assert!(reader.read_rec().await.unwrap().is_none());
        reader.close();
    }

    #[tokio::test]
    async fn rewind_replays_from_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        write_sample(&path).await;

        let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
        let mut reader = FileReader::open(config, null_iemgr()).await.unwrap();
        reader.read_rec().await.unwrap();
        reader.rewind();
        let first = reader.read_rec().await.unwrap().unwrap();
        assert_eq!(first.data, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn filter_excludes_other_odids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        write_sample(&path).await;

        let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
        let mut reader = FileReader::open(config, null_iemgr()).await.unwrap();
        reader.set_filter(ReadFilter::new().accept_pair(1, 2));
        assert!(reader.read_rec().await.unwrap().is_none());

        reader.clear_filter();
        assert!(reader.read_rec().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn filter_accepts_a_session_or_an_odid_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        write_sample(&path).await;

        let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
        let mut reader = FileReader::open(config, null_iemgr()).await.unwrap();
        let sid = *reader.sessions().keys().next().unwrap();

        // Accept every ODID for this session, without knowing odid=1 ahead
        // of time.
        reader.set_filter(ReadFilter::new().accept_sid(sid));
        assert!(reader.read_rec().await.unwrap().is_some());

        // Accept every session for odid=1, without knowing the session id.
        reader.set_filter(ReadFilter::new().accept_odid(1));
        assert!(reader.read_rec().await.unwrap().is_some());

        // Neither set nor the explicit-pair set mentions this combination.
        reader.set_filter(ReadFilter::new().accept_sid(sid + 1).accept_odid(2));
        assert!(reader.read_rec().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_reflect_every_record_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fds");
        write_sample(&path).await;

        let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
        let reader = FileReader::open(config, null_iemgr()).await.unwrap();
        assert_eq!(reader.stats().recs_total, 2);
    }
}
