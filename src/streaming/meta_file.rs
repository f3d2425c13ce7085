//! Section files on disk
//!
//! Layout: a 16 byte header followed by the body.
//!
//! ```text
//! 0..4   magic ("TLDD" data, "TLDR" render)
//! 4      version
//! 5      detail
//! 6      compression (0 raw, 1 lz4 frame)
//! 7      reserved
//! 8..12  x (i32 LE)
//! 12..16 z (i32 LE)
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::loader_registry::LoaderRegistry;
use super::lz4_stream::{Lz4FrameReader, Lz4FrameWriter};
use crate::core::config::Compression;
use crate::core::error::{LodError, Result};
use crate::math::{QuadPos, MAX_DETAIL};
use crate::source::{LodSource, SourceContext, SourceKind};

pub const DATA_MAGIC: [u8; 4] = *b"TLDD";
pub const RENDER_MAGIC: [u8; 4] = *b"TLDR";
pub const HEADER_LEN: usize = 16;

/// File extension of section files
pub const EXTENSION: &str = "tld";

fn magic_for(kind: SourceKind) -> [u8; 4] {
    match kind {
        SourceKind::Data => DATA_MAGIC,
        SourceKind::Render => RENDER_MAGIC,
    }
}

/// Decoded file header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetaHeader {
    pub kind: SourceKind,
    pub version: u8,
    pub compression: Compression,
    pub pos: QuadPos,
}

impl MetaHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&magic_for(self.kind));
        out[4] = self.version;
        out[5] = self.pos.detail;
        out[6] = self.compression.tag();
        out[8..12].copy_from_slice(&self.pos.x.to_le_bytes());
        out[12..16].copy_from_slice(&self.pos.z.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(LodError::corrupt(path, format!("header is {} bytes", bytes.len())));
        }
        let kind = match [bytes[0], bytes[1], bytes[2], bytes[3]] {
            DATA_MAGIC => SourceKind::Data,
            RENDER_MAGIC => SourceKind::Render,
            other => return Err(LodError::corrupt(path, format!("bad magic {:?}", other))),
        };
        let detail = bytes[5];
        if detail > MAX_DETAIL {
            return Err(LodError::corrupt(path, format!("detail {} out of range", detail)));
        }
        let compression = Compression::from_tag(bytes[6])
            .ok_or_else(|| LodError::corrupt(path, format!("unknown compression {}", bytes[6])))?;
        let x = i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let z = i32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok(Self {
            kind,
            version: bytes[4],
            compression,
            pos: QuadPos::new(detail, x, z),
        })
    }
}

/// Canonical path of a section file
///
/// `<root>/<kind>/<detail>/<x>_<z>.tld`
pub fn path_for(root: &Path, kind: SourceKind, pos: QuadPos) -> PathBuf {
    root.join(kind.dir_name())
        .join(pos.detail.to_string())
        .join(format!("{}_{}.{}", pos.x, pos.z, EXTENSION))
}

/// Serialize a source into complete file bytes
pub fn encode_file<S: LodSource>(source: &S, compression: Compression) -> Result<Vec<u8>> {
    let header = MetaHeader {
        kind: S::KIND,
        version: S::CURRENT_VERSION,
        compression,
        pos: source.pos(),
    };
    let mut out = Vec::with_capacity(4096);
    out.extend_from_slice(&header.encode());
    match compression {
        Compression::Uncompressed => source.save(&mut out)?,
        Compression::Lz4 => {
            let mut writer = Lz4FrameWriter::new(&mut out);
            source.save(&mut writer)?;
            writer.close()?;
        }
    }
    Ok(out)
}

/// Parse complete file bytes into a source
///
/// `pos` is the section the caller expects; a file for another section is corrupt.
pub fn decode_file<S: LodSource>(
    bytes: &[u8],
    path: &Path,
    pos: QuadPos,
    registry: &LoaderRegistry<S>,
    ctx: &SourceContext,
) -> Result<S> {
    let header = MetaHeader::decode(bytes, path)?;
    if header.kind != S::KIND {
        return Err(LodError::corrupt(path, format!("{:?} file where {:?} expected", header.kind, S::KIND)));
    }
    if header.pos != pos {
        return Err(LodError::corrupt(path, format!("file holds {}, expected {}", header.pos, pos)));
    }

    let mut body = &bytes[HEADER_LEN..];
    let loaded = match header.compression {
        Compression::Uncompressed => registry.load(header.version, &mut body, pos, ctx, path),
        Compression::Lz4 => {
            let mut reader = Lz4FrameReader::new(&mut body);
            registry.load(header.version, &mut reader, pos, ctx, path)
        }
    };
    loaded.map_err(|e| attach_path(e, path))
}

/// Body errors carry no path and reading from memory only fails on bad data
fn attach_path(err: LodError, path: &Path) -> LodError {
    match err {
        LodError::CorruptFile { path: p, reason } if p.as_os_str().is_empty() => {
            LodError::corrupt(path, reason)
        }
        LodError::Io(e) => LodError::corrupt(path, e),
        other => other,
    }
}

/// Write file bytes through a temporary file and rename over the target
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
    static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // each write gets its own temp file
    let tmp = path.with_extension(format!(
        "{}.{}-{}.tmp",
        EXTENSION,
        std::process::id(),
        NEXT_TMP.fetch_add(1, Ordering::Relaxed)
    ));
    let written = match tokio::fs::write(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> LodError {
    LodError::Io(io::Error::other(e))
}

/// A section file whose header has been read
#[derive(Clone, Debug, PartialEq)]
pub struct MetaFile {
    pub path: PathBuf,
    pub header: MetaHeader,
    pub modified: Option<SystemTime>,
}

impl MetaFile {
    /// Read only the header of `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_blocking(path))
            .await
            .map_err(join_error)?
    }

    fn open_blocking(path: PathBuf) -> Result<Self> {
        let mut file = std::fs::File::open(&path)?;
        let mut buf = [0u8; HEADER_LEN];
        if let Err(e) = file.read_exact(&mut buf) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(LodError::corrupt(&path, "truncated header"));
            }
            return Err(e.into());
        }
        let header = MetaHeader::decode(&buf, &path)?;
        let modified = file.metadata()?.modified().ok();
        Ok(Self { path, header, modified })
    }

    pub fn pos(&self) -> QuadPos {
        self.header.pos
    }

    pub fn version(&self) -> u8 {
        self.header.version
    }

    /// Read and decode the whole file
    ///
    /// Decompression and deserialization run on the blocking pool.
    pub async fn read_source<S: LodSource>(&self, registry: &LoaderRegistry<S>, ctx: &SourceContext) -> Result<S> {
        let bytes = tokio::fs::read(&self.path).await?;
        let path = self.path.clone();
        let pos = self.header.pos;
        let registry = registry.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || decode_file(&bytes, &path, pos, &registry, &ctx))
            .await
            .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChunkUpdate, DataSource, LevelContext, PaletteColors, RenderSource};
    use glam::IVec2;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx() -> SourceContext {
        SourceContext::new(LevelContext::default(), Arc::new(PaletteColors::new()))
    }

    fn filled(pos: QuadPos, ctx: &SourceContext) -> DataSource {
        let mut source = DataSource::new(pos);
        let mut update = ChunkUpdate::full_height(IVec2::new(pos.x, pos.z), &ctx.level);
        update.fill("stone", 0, 32, 0xFF);
        source.update(&update, ctx).unwrap();
        source
    }

    #[test]
    fn test_header_layout() {
        let header = MetaHeader {
            kind: SourceKind::Render,
            version: 3,
            compression: Compression::Lz4,
            pos: QuadPos::new(7, -2, 300),
        };
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], b"TLDR");
        assert_eq!(bytes[4], 3);
        assert_eq!(bytes[5], 7);
        assert_eq!(bytes[6], 1);
        assert_eq!(&bytes[8..12], &(-2i32).to_le_bytes());
        assert_eq!(MetaHeader::decode(&bytes, Path::new("x")).unwrap(), header);
    }

    #[test]
    fn test_bad_headers_are_corrupt() {
        let path = Path::new("bad.tld");
        assert!(matches!(MetaHeader::decode(b"TLDD", path), Err(LodError::CorruptFile { .. })));

        let mut bytes = MetaHeader {
            kind: SourceKind::Data,
            version: 1,
            compression: Compression::Uncompressed,
            pos: QuadPos::new(4, 0, 0),
        }
        .encode();
        bytes[6] = 9;
        assert!(matches!(MetaHeader::decode(&bytes, path), Err(LodError::CorruptFile { .. })));
        bytes[0] = b'X';
        assert!(matches!(MetaHeader::decode(&bytes, path), Err(LodError::CorruptFile { .. })));
    }

    #[test]
    fn test_path_layout() {
        let path = path_for(Path::new("/w"), SourceKind::Data, QuadPos::new(6, -3, 12));
        assert_eq!(path, PathBuf::from("/w/data/6/-3_12.tld"));
    }

    #[test]
    fn test_encode_decode_both_compressions() {
        let ctx = ctx();
        let pos = QuadPos::new(4, 2, -1);
        let source = filled(pos, &ctx);
        let registry = LoaderRegistry::<DataSource>::with_current();

        for compression in [Compression::Uncompressed, Compression::Lz4] {
            let bytes = encode_file(&source, compression).unwrap();
            let decoded = decode_file(&bytes, Path::new("f.tld"), pos, &registry, &ctx).unwrap();
            assert_eq!(decoded.columns(), source.columns());
        }
    }

    #[test]
    fn test_decode_errors() {
        let ctx = ctx();
        let pos = QuadPos::new(4, 0, 0);
        let source = filled(pos, &ctx);
        let path = Path::new("f.tld");
        let mut bytes = encode_file(&source, Compression::Lz4).unwrap();

        // wrong section
        let registry = LoaderRegistry::<DataSource>::with_current();
        let other = QuadPos::new(4, 1, 0);
        assert!(matches!(
            decode_file(&bytes, path, other, &registry, &ctx),
            Err(LodError::CorruptFile { .. })
        ));

        // wrong kind
        let render_registry = LoaderRegistry::<RenderSource>::with_current();
        assert!(matches!(
            decode_file(&bytes, path, pos, &render_registry, &ctx),
            Err(LodError::CorruptFile { .. })
        ));

        // unregistered version
        bytes[4] = 42;
        assert!(matches!(
            decode_file(&bytes, path, pos, &registry, &ctx),
            Err(LodError::VersionMismatch { found: 42, .. })
        ));

        // damaged body
        bytes[4] = 1;
        let len = bytes.len();
        bytes.truncate(len - 8);
        match decode_file(&bytes, path, pos, &registry, &ctx) {
            Err(LodError::CorruptFile { path: p, .. }) => assert_eq!(p, PathBuf::from("f.tld")),
            other => panic!("expected corrupt file, got {:?}", other.map(|s| s.pos())),
        }
    }

    #[tokio::test]
    async fn test_write_open_read() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx();
        let pos = QuadPos::new(4, 0, 3);
        let source = filled(pos, &ctx);
        let path = path_for(dir.path(), SourceKind::Data, pos);

        let bytes = encode_file(&source, Compression::Lz4).unwrap();
        write_atomic(&path, bytes).await.unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| p != &path)
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {:?}", leftovers);

        let meta = MetaFile::open(&path).await.unwrap();
        assert_eq!(meta.pos(), pos);
        assert_eq!(meta.version(), 1);
        assert!(meta.modified.is_some());

        let registry = LoaderRegistry::<DataSource>::with_current();
        let loaded: DataSource = meta.read_source(&registry, &ctx).await.unwrap();
        assert_eq!(loaded.columns(), source.columns());
    }

    #[tokio::test]
    async fn test_open_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.tld");
        std::fs::write(&path, b"TLDD\x01").unwrap();
        assert!(matches!(MetaFile::open(&path).await, Err(LodError::CorruptFile { .. })));
        assert!(matches!(
            MetaFile::open(dir.path().join("missing.tld")).await,
            Err(LodError::Io(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("4").join("0_0.tld");
        let contents: Vec<Vec<u8>> = (0..8u8).map(|n| vec![n; 64 * 1024]).collect();

        let tasks: Vec<_> = contents
            .iter()
            .cloned()
            .map(|bytes| {
                let path = path.clone();
                tokio::spawn(async move { write_atomic(&path, bytes).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // the file is one complete write, never a mix
        let on_disk = std::fs::read(&path).unwrap();
        assert!(contents.contains(&on_disk));
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
