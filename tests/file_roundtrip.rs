//! End-to-end coverage of the file container: write, then read back under
//! every access mode and compression algorithm, across multiple sessions
//! and Observation Domains.

use fds_file::block::session::{SessionDescriptor, SessionProto};
use fds_file::compression::CompressionAlgorithm;
use fds_file::config::{AccessMode, FileConfigBuilder};
use fds_file::ie::null_iemgr;
use fds_file::template::TemplateType;
use fds_file::{FileReader, FileWriter, ReadFilter};

fn descriptor(port_src: u16) -> SessionDescriptor {
    SessionDescriptor {
        ip_src: [10; 16],
        ip_dst: [20; 16],
        port_src,
        port_dst: 4739,
        proto: SessionProto::Udp,
    }
}

/// A minimal fixed-length Data Template record: id, field count 1, IE
/// 8/0 (sourceIPv4Address-shaped), fixed length 4.
fn data_template_bytes(id: u16) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&id.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&8u16.to_be_bytes());
    body.extend_from_slice(&4u16.to_be_bytes());
    body
}

async fn write_two_sessions(path: &std::path::Path, compression: CompressionAlgorithm) {
    let config = FileConfigBuilder::new(path, AccessMode::WriteTruncate)
        .compression(compression)
        .build()
        .unwrap();
    let mut writer = FileWriter::open(config).await.unwrap();
    writer.set_iemgr(null_iemgr()).unwrap();

    let sid_a = writer.session_add(descriptor(1001)).await.unwrap();
    writer.select_ctx(sid_a, 1, 1_600_000_000).unwrap();
    writer.tmplt_add(TemplateType::Data, &data_template_bytes(300)).await.unwrap();
    writer.write_rec(300, &[1, 1, 1, 1], 17, 4, 1).await.unwrap();
    writer.write_rec(300, &[2, 2, 2, 2], 17, 4, 1).await.unwrap();

    let sid_b = writer.session_add(descriptor(1002)).await.unwrap();
    writer.select_ctx(sid_b, 2, 1_600_000_100).unwrap();
    writer.tmplt_add(TemplateType::Data, &data_template_bytes(400)).await.unwrap();
    writer.write_rec(400, &[9, 9, 9, 9], 6, 4, 1).await.unwrap();

    writer.close().await.unwrap();
}

#[tokio::test]
async fn round_trips_records_across_two_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("two_sessions.fds");
    write_two_sessions(&path, CompressionAlgorithm::None).await;

    let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
    let mut reader = FileReader::open(config, null_iemgr()).await.unwrap();
    assert_eq!(reader.sessions().len(), 2);

    let mut seen = Vec::new();
    while let Some(rec) = reader.read_rec().await.unwrap() {
        seen.push((rec.context.odid, rec.data));
    }
    assert_eq!(
        seen,
        vec![
            (1, vec![1, 1, 1, 1]),
            (1, vec![2, 2, 2, 2]),
            (2, vec![9, 9, 9, 9]),
        ]
    );
    assert_eq!(reader.stats().recs_total, 3);
    reader.close();
}

#[tokio::test]
async fn compression_round_trips_transparently() {
    for algorithm in [CompressionAlgorithm::Lz4, CompressionAlgorithm::Zstd] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compressed.fds");
        write_two_sessions(&path, algorithm).await;

        let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
        let mut reader = FileReader::open(config, null_iemgr()).await.unwrap();
        assert_eq!(reader.compression(), algorithm);

        let mut count = 0;
        while reader.read_rec().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3, "algorithm {algorithm:?} lost records in transit");
    }
}

#[tokio::test]
async fn filter_restricts_to_one_observation_domain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filtered.fds");
    write_two_sessions(&path, CompressionAlgorithm::None).await;

    let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
    let mut reader = FileReader::open(config, null_iemgr()).await.unwrap();

    let sid_b = *reader
        .sessions()
        .iter()
        .find(|(_, desc)| desc.port_src == 1002)
        .unwrap()
        .0;
    reader.set_filter(ReadFilter::new().accept_pair(sid_b, 2));

    let mut seen = Vec::new();
    while let Some(rec) = reader.read_rec().await.unwrap() {
        seen.push(rec.data);
    }
    assert_eq!(seen, vec![vec![9, 9, 9, 9]]);
}

#[tokio::test]
async fn append_mode_adds_records_to_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appended.fds");
    write_two_sessions(&path, CompressionAlgorithm::None).await;

    let append_config = FileConfigBuilder::new(&path, AccessMode::WriteAppend).build().unwrap();
    let mut writer = FileWriter::open(append_config).await.unwrap();
    writer.set_iemgr(null_iemgr()).unwrap();
    let sid = writer.session_add(descriptor(1001)).await.unwrap();
    writer.select_ctx(sid, 1, 1_600_000_200).unwrap();
    writer.tmplt_add(TemplateType::Data, &data_template_bytes(300)).await.unwrap();
    writer.write_rec(300, &[3, 3, 3, 3], 17, 4, 1).await.unwrap();
    writer.close().await.unwrap();

    let read_config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
    let mut reader = FileReader::open(read_config, null_iemgr()).await.unwrap();
    let mut count = 0;
    while reader.read_rec().await.unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 4);
}

#[tokio::test]
async fn opening_a_truncated_file_as_a_writer_fails_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.fds");
    std::fs::write(&path, b"not an fds file").unwrap();

    let config = FileConfigBuilder::new(&path, AccessMode::Read).build().unwrap();
    let err = FileReader::open(config, null_iemgr()).await.unwrap_err();
    assert_eq!(err.kind(), fds_file::ErrorKind::Format);
}

#[tokio::test]
async fn reader_rejects_non_read_access_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.fds");
    let config = FileConfigBuilder::new(&path, AccessMode::WriteTruncate).build().unwrap();
    let err = FileReader::open(config, null_iemgr()).await.unwrap_err();
    assert_eq!(err.kind(), fds_file::ErrorKind::Argument);
}
