//! Persisted page-size cache
//!
//! Querying every page's dimensions from a decoder can be slow for large
//! documents, so the sizes are stored next to other cache data in a small
//! binary file per document:
//!
//! ```text
//! [count: i32 BE] then count x [width: i32 BE][height: i32 BE]
//! ```
//!
//! Unknown sizes are written as `-1, -1`. The file name is the SHA-256 hex
//! digest of the document path with a `.cache` extension.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Largest page count accepted from a cache file
pub const MAX_CACHED_PAGES: i32 = 1_000_000;

const UNKNOWN: i32 = -1;

/// Native page dimensions as reported by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl PageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; 1.0 for degenerate sizes
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Landscape pages are candidates for splitting into two view pages
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

/// Write page sizes in the cache format
pub fn store_pages_info<W: Write>(mut out: W, pages: &[Option<PageSize>]) -> io::Result<()> {
    let count = i32::try_from(pages.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many pages"))?;
    out.write_all(&count.to_be_bytes())?;

    for page in pages {
        let (width, height) = match page.and_then(encode_size) {
            Some(size) => size,
            None => (UNKNOWN, UNKNOWN),
        };
        out.write_all(&width.to_be_bytes())?;
        out.write_all(&height.to_be_bytes())?;
    }
    out.flush()
}

fn encode_size(size: PageSize) -> Option<(i32, i32)> {
    Some((i32::try_from(size.width).ok()?, i32::try_from(size.height).ok()?))
}

fn read_i32<R: Read>(input: &mut R) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(i32::from_be_bytes(bytes))
}

/// Read page sizes written by [`store_pages_info`]
///
/// Fails with `UnexpectedEof` on a truncated stream and `InvalidData` on a
/// negative or implausibly large page count. Entries with a negative
/// dimension load as `None`.
pub fn load_pages_info<R: Read>(mut input: R) -> io::Result<Vec<Option<PageSize>>> {
    let count = read_i32(&mut input)?;
    if !(0..=MAX_CACHED_PAGES).contains(&count) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad page count {count}"),
        ));
    }

    let mut pages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let width = read_i32(&mut input)?;
        let height = read_i32(&mut input)?;
        if width < 0 || height < 0 {
            pages.push(None);
        } else {
            pages.push(Some(PageSize::new(width as u32, height as u32)));
        }
    }
    Ok(pages)
}

/// Directory of page-size cache files, one per document
#[derive(Debug, Clone)]
pub struct PageInfoCache {
    dir: PathBuf,
}

impl PageInfoCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file used for `document`
    pub fn cache_file(&self, document: &Path) -> PathBuf {
        let digest = Sha256::digest(document.to_string_lossy().as_bytes());
        self.dir.join(format!("{}.cache", hex::encode(digest)))
    }

    /// Load cached sizes for `document`
    ///
    /// A missing, truncated or malformed file is a cache miss.
    pub fn load(&self, document: &Path) -> Option<Vec<Option<PageSize>>> {
        let file = self.cache_file(document);
        let reader = match fs::File::open(&file) {
            Ok(f) => BufReader::new(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %file.display(), "no page-size cache");
                return None;
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "cannot open page-size cache");
                return None;
            }
        };

        match load_pages_info(reader) {
            Ok(pages) => {
                debug!(path = %file.display(), pages = pages.len(), "page sizes loaded from cache");
                Some(pages)
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "page-size cache is corrupt");
                None
            }
        }
    }

    /// Store sizes for `document`, replacing any existing file
    pub fn store(&self, document: &Path, pages: &[Option<PageSize>]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let file = self.cache_file(document);
        let temp = file.with_extension("cache.tmp");

        {
            let writer = BufWriter::new(fs::File::create(&temp)?);
            store_pages_info(writer, pages)?;
        }
        fs::rename(&temp, &file)?;

        debug!(path = %file.display(), pages = pages.len(), "page sizes stored");
        Ok(())
    }

    /// Remove the cache file for `document`, if any
    pub fn remove(&self, document: &Path) -> io::Result<()> {
        match fs::remove_file(self.cache_file(document)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_keeps_unknown_entries() {
        let pages = vec![
            Some(PageSize::new(612, 792)),
            None,
            Some(PageSize::new(1190, 842)),
        ];
        let mut bytes = Vec::new();
        store_pages_info(&mut bytes, &pages).unwrap();

        assert_eq!(bytes.len(), 4 + 3 * 8);
        assert_eq!(&bytes[0..4], &3i32.to_be_bytes());
        assert_eq!(&bytes[12..16], &(-1i32).to_be_bytes());
        assert_eq!(&bytes[16..20], &(-1i32).to_be_bytes());

        let loaded = load_pages_info(Cursor::new(bytes)).unwrap();
        assert_eq!(loaded, pages);
    }

    #[test]
    fn test_empty_document() {
        let mut bytes = Vec::new();
        store_pages_info(&mut bytes, &[]).unwrap();
        assert_eq!(bytes, 0i32.to_be_bytes());
        assert!(load_pages_info(Cursor::new(bytes)).unwrap().is_empty());
    }

    #[test]
    fn test_short_read_is_an_error() {
        let mut bytes = Vec::new();
        store_pages_info(&mut bytes, &[Some(PageSize::new(10, 20))]).unwrap();
        bytes.truncate(bytes.len() - 2);

        let err = load_pages_info(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_negative_count_is_invalid() {
        let bytes = (-5i32).to_be_bytes().to_vec();
        let err = load_pages_info(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_cache_file_name_is_sha256_of_path() {
        let cache = PageInfoCache::new("/tmp/pages");
        let file = cache.cache_file(Path::new("/books/a.pdf"));
        let name = file.file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.ends_with(".cache"));
        assert_eq!(name.len(), 64 + ".cache".len());
        assert_ne!(file, cache.cache_file(Path::new("/books/b.pdf")));
    }

    #[test]
    fn test_store_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = PageInfoCache::new(dir.path().join("nested"));
        let doc = Path::new("/books/manual.pdf");
        let pages = vec![Some(PageSize::new(100, 200)), None];

        assert!(cache.load(doc).is_none());
        cache.store(doc, &pages).unwrap();
        assert_eq!(cache.load(doc), Some(pages));

        cache.remove(doc).unwrap();
        assert!(cache.load(doc).is_none());
        cache.remove(doc).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = PageInfoCache::new(dir.path());
        let doc = Path::new("/books/broken.pdf");
        fs::write(cache.cache_file(doc), [0u8, 0, 0, 9, 0, 0]).unwrap();

        assert!(cache.load(doc).is_none());
    }

    #[test]
    fn test_aspect_ratio_and_orientation() {
        let size = PageSize::new(800, 400);
        assert!((size.aspect_ratio() - 2.0).abs() < f32::EPSILON);
        assert!(size.is_landscape());
        assert!(!PageSize::new(400, 800).is_landscape());
        assert!((PageSize::new(10, 0).aspect_ratio() - 1.0).abs() < f32::EPSILON);
    }
}
