//! Document sources and the in-memory page buffer.
//!
//! A [`DocumentSource`] maps a request path to page bytes.  The renderer
//! reads the whole page into a [`DocumentBuffer`] before any output is
//! produced, so every source failure is reported as a clean error response.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};

use crate::error::JstError;

/// Where page templates come from.
pub trait DocumentSource: Send + Sync {
    /// Size of the document in bytes.
    fn stat(&self, path: &str) -> io::Result<u64>;

    /// Open the document for reading.  Dropping the reader closes it.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>>;
}

// ── DocumentBuffer ────────────────────────────────────────────────────────────

/// The whole page, owned by one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBuffer {
    path: String,
    bytes: Vec<u8>,
}

impl DocumentBuffer {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        DocumentBuffer {
            path: path.into(),
            bytes: bytes.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Read a whole document from `source`.
///
/// Pages larger than `max_size` bytes, or for which memory cannot be
/// reserved, fail with [`JstError::Allocation`].
pub fn read_document(
    source: &dyn DocumentSource,
    path: &str,
    max_size: u64,
) -> Result<DocumentBuffer, JstError> {
    let io_err = |op: &'static str| move |source: io::Error| JstError::DocumentIo {
        op,
        path: path.to_owned(),
        source,
    };

    let size = source.stat(path).map_err(io_err("stat"))?;
    if size > max_size {
        return Err(JstError::Allocation { size });
    }
    let len = usize::try_from(size).map_err(|_| JstError::Allocation { size })?;
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| JstError::Allocation { size })?;

    let reader = source.open(path).map_err(io_err("open"))?;
    reader
        .take(size)
        .read_to_end(&mut bytes)
        .map_err(io_err("read"))?;
    if bytes.len() != len {
        return Err(io_err("read")(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, got {}", bytes.len()),
        )));
    }
    Ok(DocumentBuffer::new(path, bytes))
}

// ── FsSource ──────────────────────────────────────────────────────────────────

/// Documents served from a directory tree.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSource { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path onto the root, refusing anything that climbs out.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("path {path} is outside the document root"),
                    ))
                }
            }
        }
        Ok(resolved)
    }
}

impl DocumentSource for FsSource {
    fn stat(&self, path: &str) -> io::Result<u64> {
        let meta = std::fs::metadata(self.resolve(path)?)?;
        if meta.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{path} is a directory")));
        }
        Ok(meta.len())
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self.resolve(path)?)?))
    }
}

// ── MemorySource ──────────────────────────────────────────────────────────────

/// Documents held in memory, keyed by request path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pages: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.pages.insert(path.into(), content.into());
    }

    fn page(&self, path: &str) -> io::Result<&[u8]> {
        self.pages
            .get(path)
            .map(Vec::as_slice)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no document {path}")))
    }
}

impl DocumentSource for MemorySource {
    fn stat(&self, path: &str) -> io::Result<u64> {
        Ok(self.page(path)?.len() as u64)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.page(path)?)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_source_reads_whole_page() {
        let mut src = MemorySource::new();
        src.insert("/index.jst", "<p><% write(1) %></p>");
        let doc = read_document(&src, "/index.jst", 1024).unwrap();
        assert_eq!(doc.path(), "/index.jst");
        assert_eq!(doc.as_bytes(), b"<p><% write(1) %></p>");
    }

    #[test]
    fn missing_page_is_not_found() {
        let err = read_document(&MemorySource::new(), "/nope.jst", 1024).unwrap_err();
        assert!(matches!(err, JstError::DocumentIo { op: "stat", .. }), "{err:?}");
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn oversize_page_is_allocation_failure() {
        let mut src = MemorySource::new();
        src.insert("/big.jst", vec![b'x'; 64]);
        let err = read_document(&src, "/big.jst", 63).unwrap_err();
        assert!(matches!(err, JstError::Allocation { size: 64 }), "{err:?}");
    }

    /// Reports a size the reader cannot deliver.
    struct ShortSource;

    impl DocumentSource for ShortSource {
        fn stat(&self, _path: &str) -> io::Result<u64> {
            Ok(10)
        }
        fn open(&self, _path: &str) -> io::Result<Box<dyn Read + '_>> {
            Ok(Box::new(Cursor::new(b"short".to_vec())))
        }
    }

    #[test]
    fn short_read_is_read_error() {
        let err = read_document(&ShortSource, "/s.jst", 1024).unwrap_err();
        assert!(matches!(err, JstError::DocumentIo { op: "read", .. }), "{err:?}");
    }

    #[test]
    fn fs_source_reads_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("status")).unwrap();
        let mut f = File::create(dir.path().join("status/temp.jst")).unwrap();
        write!(f, "T=<% write(t) %>").unwrap();

        let src = FsSource::new(dir.path());
        assert_eq!(src.stat("/status/temp.jst").unwrap(), 16);
        let doc = read_document(&src, "/status/temp.jst", 1024).unwrap();
        assert_eq!(doc.as_bytes(), b"T=<% write(t) %>");
    }

    #[test]
    fn fs_source_refuses_traversal_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = FsSource::new(dir.path().join("www"));
        std::fs::create_dir(src.root()).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
        assert_eq!(src.stat("/../secret.txt").unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(src.stat("/").unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
