//! Catalog bookkeeping and path mapping: no Hyper types here.

use std::collections::HashMap;
use std::fs::Metadata;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, StaticError};

/// Files smaller than this are never compressed.
pub const GZIP_MIN_BYTES: u64 = 1024;

/// Served path -> file, shared by every handler of one resolver.
pub type SharedCatalog = Arc<RwLock<HashMap<String, CatalogEntry>>>;

pub fn new_catalog() -> SharedCatalog {
    Arc::new(RwLock::new(HashMap::new()))
}

/// What the catalog knows about one served path.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Index of the owning directory; the highest layer wins.
    pub layer: usize,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub content_type: String,
    pub compressible: bool,
    pub etag: String,
    pub buffer: Option<Bytes>,
    pub gzip: Option<Bytes>,
}

impl CatalogEntry {
    /// `None` for anything that is not a regular file, or when the platform
    /// has no modification time.
    pub fn from_metadata(layer: usize, path: PathBuf, metadata: &Metadata) -> Option<Self> {
        if !metadata.is_file() {
            return None;
        }
        let modified = metadata.modified().ok()?;
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        let size = metadata.len();
        Some(Self {
            layer,
            size,
            modified,
            content_type: content_type_for(&mime),
            compressible: is_compressible(&mime),
            etag: weak_etag(size, modified),
            buffer: None,
            gzip: None,
            path,
        })
    }

    /// True once the file on disk no longer matches what was recorded.
    pub fn is_stale(&self, metadata: &Metadata) -> bool {
        self.size != metadata.len() || metadata.modified().ok() != Some(self.modified)
    }
}

// ---------------------- Time & validators ----------------------

/// Milliseconds since the Unix epoch, negative for older timestamps.
pub fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Validator derived from size and mtime only; contents are never hashed.
pub fn weak_etag(size: u64, modified: SystemTime) -> String {
    format!("W/\"{:x}-{:x}\"", size, epoch_millis(modified))
}

/// `If-None-Match` semantics with weak comparison.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let ours = etag.trim_start_matches("W/");
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || tag.trim_start_matches("W/") == ours)
}

/// Last second an HTTP date can express (9999-12-31T23:59:59Z).
const HTTP_DATE_MAX_SECS: u64 = 253_402_300_799;

/// `Last-Modified` value, or `None` when `modified` falls outside what an
/// HTTP date can carry (before 1970 or after 9999).
pub fn http_date(modified: SystemTime) -> Option<String> {
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    (secs <= HTTP_DATE_MAX_SECS).then(|| httpdate::fmt_http_date(modified))
}

/// HTTP dates carry whole seconds, so compare at that precision.
pub fn not_modified_since(modified: SystemTime, since: SystemTime) -> bool {
    let secs = |t: SystemTime| t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    secs(modified) <= secs(since)
}

// ---------------------- Content negotiation ----------------------

fn content_type_for(mime: &mime_guess::Mime) -> String {
    let essence = mime.essence_str();
    let textual = mime.type_() == mime_guess::mime::TEXT
        || essence == "application/javascript"
        || essence == "application/json";
    if textual && mime.get_param(mime_guess::mime::CHARSET).is_none() {
        format!("{essence}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

fn is_compressible(mime: &mime_guess::Mime) -> bool {
    if mime.type_() == mime_guess::mime::TEXT {
        return true;
    }
    let suffix = mime.suffix().map(|s| s.as_str());
    matches!(suffix, Some("json") | Some("xml"))
        || matches!(
            mime.essence_str(),
            "application/javascript"
                | "application/json"
                | "application/xml"
                | "application/wasm"
                | "image/svg+xml"
        )
}

/// Whether an `Accept-Encoding` value allows gzip.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    accept_encoding.split(',').any(|item| {
        let mut parts = item.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        let quality = parts
            .find_map(|p| p.trim().strip_prefix("q="))
            .and_then(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        (coding.eq_ignore_ascii_case("gzip") || coding == "*") && quality > 0.0
    })
}

pub fn gzip_bytes(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

// ---------------------- Path mapping ----------------------

/// Turn a request path into a catalog key, or `None` if it is outside
/// `prefix` or tries to climb out of the root.
pub fn map_request_path(uri_path: &str, prefix: &str) -> Option<String> {
    let rest = if prefix.is_empty() {
        uri_path
    } else {
        let rest = uri_path.strip_prefix(prefix)?;
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        rest
    };

    let decoded = urlencoding::decode(rest).ok()?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return None;
    }

    let mut segments = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }

    // Root and trailing slash both mean the directory index.
    if segments.is_empty() || decoded.ends_with('/') {
        segments.push("index.html");
    }
    Some(segments.join("/"))
}

// ---------------------- Catalog ----------------------

/// What a handler should do for one key.
#[derive(Debug)]
pub enum Lookup {
    /// Serve this entry without touching the disk.
    Hit(CatalogEntry),
    /// Stat the disk. Carries this layer's previous entry, if any.
    Stat(Option<CatalogEntry>),
    /// This layer has nothing for the key.
    Skip,
}

pub fn plan_lookup(
    cached: Option<CatalogEntry>,
    layer: usize,
    revalidate: bool,
    preloaded: bool,
) -> Lookup {
    let owned = cached.filter(|entry| entry.layer == layer);
    match (revalidate, owned) {
        (false, Some(entry)) => Lookup::Hit(entry),
        (false, None) if preloaded => Lookup::Skip,
        (_, owned) => Lookup::Stat(owned),
    }
}

pub fn cached(catalog: &SharedCatalog, key: &str) -> Option<CatalogEntry> {
    catalog
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
}

/// Insert unless a higher layer already owns the key. Returns whether the
/// entry was stored.
pub fn record(catalog: &SharedCatalog, key: &str, entry: CatalogEntry) -> bool {
    let mut files = catalog.write().unwrap_or_else(PoisonError::into_inner);
    match files.get(key) {
        Some(existing) if existing.layer > entry.layer => false,
        _ => {
            files.insert(key.to_string(), entry);
            true
        }
    }
}

/// Drop the key, but only if `layer` owns it.
pub fn evict(catalog: &SharedCatalog, key: &str, layer: usize) {
    let mut files = catalog.write().unwrap_or_else(PoisonError::into_inner);
    if files.get(key).is_some_and(|entry| entry.layer == layer) {
        files.remove(key);
    }
}

/// Attach a compressed body to the stored entry, if it is still the same file.
pub fn store_gzip(catalog: &SharedCatalog, key: &str, entry: &CatalogEntry, gzip: Bytes) {
    let mut files = catalog.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(stored) = files.get_mut(key) {
        if stored.layer == entry.layer && stored.modified == entry.modified {
            stored.gzip = Some(gzip);
        }
    }
}

/// Catalog key for a file under `root`, `/`-separated.
fn catalog_key(root: &Path, path: &Path) -> Result<Option<String>> {
    let relative = path.strip_prefix(root).map_err(|_| StaticError::OutsideRoot {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
    })?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component.as_os_str().to_str() {
            Some(part) => parts.push(part),
            None => return Ok(None),
        }
    }
    Ok(Some(parts.join("/")))
}

/// Walk `root` into the catalog under `layer`. Returns how many entries this
/// layer now owns.
pub fn preload(catalog: &SharedCatalog, root: &Path, layer: usize, buffer: bool) -> usize {
    let mut stored = 0;
    for dir_entry in WalkDir::new(root).follow_links(true) {
        let dir_entry = match dir_entry {
            Ok(e) => e,
            Err(e) => {
                debug!(root = %root.display(), error = %e, "skipping unreadable path during preload");
                continue;
            }
        };
        if !dir_entry.file_type().is_file() {
            continue;
        }

        let key = match catalog_key(root, dir_entry.path()) {
            Ok(Some(key)) => key,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "skipping file during preload");
                continue;
            }
        };
        let Ok(metadata) = dir_entry.metadata() else {
            continue;
        };
        let Some(mut entry) =
            CatalogEntry::from_metadata(layer, dir_entry.path().to_path_buf(), &metadata)
        else {
            continue;
        };

        if buffer {
            match std::fs::read(&entry.path) {
                Ok(bytes) => entry.buffer = Some(Bytes::from(bytes)),
                Err(e) => {
                    debug!(error = %StaticError::io(&entry.path, e), "skipping file during preload");
                    continue;
                }
            }
        }

        if record(catalog, &key, entry) {
            stored += 1;
        }
    }

    debug!(root = %root.display(), layer, stored, "preloaded directory");
    stored
}
