//! End-to-end coverage of mounting a PKZIP archive: directory synthesis,
//! stat/readdir/read semantics, and a stream-backed mount that has to wait
//! for bytes to arrive.

use std::io::Write;
use std::sync::Arc;

use camino::Utf8Path;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use archivefs::{ByteSource, FileSystem, InMemorySource, ZipFileSystem};

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

const LOCAL_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
const CENTRAL_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
const EOCD_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];

struct FixtureEntry {
    name: &'static str,
    data: Vec<u8>,
    method: u16,
}

fn build_zip(entries: &[FixtureEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    let mut compressed_blobs = Vec::new();

    for entry in entries {
        let compressed = match entry.method {
            0 => entry.data.clone(),
            8 => {
                let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
                enc.write_all(&entry.data).unwrap();
                enc.finish().unwrap()
            }
            other => panic!("unsupported fixture method {other}"),
        };

        offsets.push(out.len() as u32);
        out.extend_from_slice(&LOCAL_MAGIC);
        put_u16(&mut out, 20);
        put_u16(&mut out, 0x0800);
        put_u16(&mut out, entry.method);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0x21);
        put_u32(&mut out, 0);
        put_u32(&mut out, compressed.len() as u32);
        put_u32(&mut out, entry.data.len() as u32);
        put_u16(&mut out, entry.name.len() as u16);
        put_u16(&mut out, 0);
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&compressed);
        compressed_blobs.push(compressed);
    }

    let cd_start = out.len() as u32;
    for (entry, (offset, compressed)) in entries.iter().zip(offsets.iter().zip(&compressed_blobs)) {
        out.extend_from_slice(&CENTRAL_MAGIC);
        put_u16(&mut out, 20);
        put_u16(&mut out, 20);
        put_u16(&mut out, 0x0800);
        put_u16(&mut out, entry.method);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0x21);
        put_u32(&mut out, 0);
        put_u32(&mut out, compressed.len() as u32);
        put_u32(&mut out, entry.data.len() as u32);
        put_u16(&mut out, entry.name.len() as u16);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u32(&mut out, 0);
        put_u32(&mut out, *offset);
        out.extend_from_slice(entry.name.as_bytes());
    }
    let cd_size = out.len() as u32 - cd_start;

    out.extend_from_slice(&EOCD_MAGIC);
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, entries.len() as u16);
    put_u16(&mut out, entries.len() as u16);
    put_u32(&mut out, cd_size);
    put_u32(&mut out, cd_start);
    put_u16(&mut out, 0);

    out
}

fn fixture_bytes() -> Vec<u8> {
    build_zip(&[
        FixtureEntry {
            name: "readme.txt",
            data: b"read me please".to_vec(),
            method: 0,
        },
        FixtureEntry {
            name: "docs/guide.md",
            data: b"# guide\n\nthis is the deflated guide text, repeated a bit for compression: blah blah blah"
                .to_vec(),
            method: 8,
        },
        FixtureEntry {
            name: "docs/notes/todo.txt",
            data: b"finish the thing".to_vec(),
            method: 0,
        },
    ])
}

#[tokio::test]
async fn stat_size_matches_read_length() {
    let bytes = fixture_bytes();
    let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
    let fs = ZipFileSystem::mount(source, Some("fixture.zip".into()), true)
        .await
        .unwrap();

    for path in ["/readme.txt", "/docs/guide.md", "/docs/notes/todo.txt"] {
        let stat = fs.stat(Utf8Path::new(path)).await.unwrap();
        let mut buf = vec![0u8; stat.size as usize];
        let n = fs.read(Utf8Path::new(path), &mut buf, 0, stat.size).await.unwrap();
        assert_eq!(n as u64, stat.size, "short read for {path}");
    }
}

#[tokio::test]
async fn synthetic_directories_are_discoverable_and_listed() {
    let bytes = fixture_bytes();
    let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
    let fs = ZipFileSystem::mount(source, None, false).await.unwrap();

    let mut root = fs.readdir(Utf8Path::new("/")).await.unwrap();
    root.sort();
    assert_eq!(root, vec!["docs", "readme.txt"]);

    let docs_stat = fs.stat(Utf8Path::new("/docs")).await.unwrap();
    assert!(docs_stat.is_dir());

    let mut docs = fs.readdir(Utf8Path::new("/docs")).await.unwrap();
    docs.sort();
    assert_eq!(docs, vec!["guide.md", "notes"]);

    let notes = fs.readdir(Utf8Path::new("/docs/notes")).await.unwrap();
    assert_eq!(notes, vec!["todo.txt"]);
}

#[tokio::test]
async fn ranged_reads_return_the_requested_window() {
    let bytes = fixture_bytes();
    let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
    let fs = ZipFileSystem::mount(source, None, true).await.unwrap();

    let mut buf = vec![0u8; 4];
    let n = fs.read(Utf8Path::new("/readme.txt"), &mut buf, 5, 9).await.unwrap();
    assert_eq!(&buf[..n], b"me p");
}

#[tokio::test]
async fn mounting_over_a_streaming_source_waits_for_bytes() {
    let bytes = fixture_bytes();
    let stream = archivefs::from_stream(bytes.len() as u64);

    let producer = {
        let stream = stream.clone();
        let bytes = bytes.clone();
        tokio::spawn(async move {
            // Trickle the archive in over several chunks, the way bytes
            // would arrive from a slow network source.
            for chunk in bytes.chunks(37) {
                stream.push(chunk).await;
                tokio::task::yield_now().await;
            }
        })
    };

    let source: Arc<dyn ByteSource> = stream;
    let fs = ZipFileSystem::mount(source, Some("stream.zip".into()), true)
        .await
        .unwrap();
    producer.await.unwrap();

    let stat = fs.stat(Utf8Path::new("/readme.txt")).await.unwrap();
    let mut buf = vec![0u8; stat.size as usize];
    fs.read(Utf8Path::new("/readme.txt"), &mut buf, 0, stat.size)
        .await
        .unwrap();
    assert_eq!(buf, b"read me please");
}

#[tokio::test]
async fn reading_a_directory_is_an_error_and_missing_paths_are_nosuchfile() {
    let bytes = fixture_bytes();
    let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
    let fs = ZipFileSystem::mount(source, None, true).await.unwrap();

    let mut buf = vec![0u8; 4];
    let err = fs.read(Utf8Path::new("/docs"), &mut buf, 0, 4).await.unwrap_err();
    assert!(matches!(err, archivefs::ArchiveError::IsADirectory(_)));

    let err = fs.stat(Utf8Path::new("/does/not/exist")).await.unwrap_err();
    assert!(matches!(err, archivefs::ArchiveError::NoSuchFile(_)));
}
