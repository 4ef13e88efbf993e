//! HTTP glue: answer a request from one directory, or pass it on.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{
    ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
    HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, VARY,
};
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{Result, StaticError};
use crate::sys_chain::{HandlerResult, Middleware, Next};
use crate::sys_config::ResolvedOptions;
use crate::sys_statichost::core::{self, CatalogEntry, Lookup, SharedCatalog};

/// Serves files under one root. Several of these share one catalog; `layer`
/// decides who owns a key when roots overlap.
pub struct DirectoryHandler {
    root: PathBuf,
    layer: usize,
    catalog: SharedCatalog,
    options: Arc<ResolvedOptions>,
    preloaded: bool,
}

impl DirectoryHandler {
    pub fn new(
        root: PathBuf,
        layer: usize,
        catalog: SharedCatalog,
        options: Arc<ResolvedOptions>,
    ) -> Self {
        let preloaded = options.preload;
        if preloaded {
            core::preload(&catalog, &root, layer, options.buffer);
        }
        Self {
            root,
            layer,
            catalog,
            options,
            preloaded,
        }
    }

    async fn resolve(&self, key: &str) -> Option<CatalogEntry> {
        let plan = core::plan_lookup(
            core::cached(&self.catalog, key),
            self.layer,
            self.options.revalidate_on_every_request,
            self.preloaded,
        );
        match plan {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Skip => None,
            Lookup::Stat(previous) => self.stat_disk(key, previous).await,
        }
    }

    async fn stat_disk(&self, key: &str, previous: Option<CatalogEntry>) -> Option<CatalogEntry> {
        let path = self.root.join(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => {
                if previous.is_some() {
                    core::evict(&self.catalog, key, self.layer);
                }
                return None;
            }
        };

        if let Some(previous) = previous.filter(|p| !p.is_stale(&metadata)) {
            return Some(previous);
        }

        let mut entry = CatalogEntry::from_metadata(self.layer, path, &metadata)?;
        if self.options.buffer {
            match tokio::fs::read(&entry.path).await {
                Ok(bytes) => entry.buffer = Some(Bytes::from(bytes)),
                Err(e) => {
                    debug!(error = %StaticError::io(&entry.path, e), "could not buffer file");
                    return None;
                }
            }
        }

        core::record(&self.catalog, key, entry.clone());
        Some(entry)
    }

    async fn respond(
        &self,
        key: &str,
        entry: &CatalogEntry,
        wants: Negotiation,
    ) -> Result<Response<Body>> {
        if wants.fresh {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::NOT_MODIFIED;
            self.insert_validators(resp.headers_mut(), entry)?;
            return Ok(resp);
        }

        let use_gzip = self.options.compress
            && entry.compressible
            && entry.size > core::GZIP_MIN_BYTES
            && wants.gzip
            // HEAD only reports a compressed length that is already known.
            && (!wants.head_only || entry.gzip.is_some());

        let (body, length) = if use_gzip {
            let gzip = self.gzip_for(key, entry).await?;
            let length = gzip.len() as u64;
            (Body::from(gzip), length)
        } else if let Some(buffer) = &entry.buffer {
            (Body::from(buffer.clone()), entry.size)
        } else if wants.head_only {
            (Body::empty(), entry.size)
        } else {
            let file = File::open(&entry.path)
                .await
                .map_err(|e| StaticError::io(&entry.path, e))?;
            (Body::wrap_stream(ReaderStream::new(file)), entry.size)
        };

        let mut resp = Response::new(if wants.head_only { Body::empty() } else { body });
        let headers = resp.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(&entry.content_type)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        self.insert_validators(headers, entry)?;
        if self.options.compress {
            headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
        }
        if use_gzip {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        Ok(resp)
    }

    fn insert_validators(&self, headers: &mut HeaderMap, entry: &CatalogEntry) -> Result<()> {
        headers.insert(CACHE_CONTROL, HeaderValue::from_str(&self.options.cache_control)?);
        if let Some(date) = core::http_date(entry.modified) {
            headers.insert(LAST_MODIFIED, HeaderValue::from_str(&date)?);
        }
        headers.insert(ETAG, HeaderValue::from_str(&entry.etag)?);
        Ok(())
    }

    async fn gzip_for(&self, key: &str, entry: &CatalogEntry) -> Result<Bytes> {
        if let Some(gzip) = &entry.gzip {
            return Ok(gzip.clone());
        }
        let raw = match &entry.buffer {
            Some(buffer) => buffer.clone(),
            None => tokio::fs::read(&entry.path)
                .await
                .map(Bytes::from)
                .map_err(|e| StaticError::io(&entry.path, e))?,
        };
        let gzip = core::gzip_bytes(&raw).map_err(|e| StaticError::io(&entry.path, e))?;
        if self.options.buffer {
            core::store_gzip(&self.catalog, key, entry, gzip.clone());
        }
        Ok(gzip)
    }
}

/// What the client asked for, read off the request before any await.
#[derive(Debug, Clone, Copy)]
struct Negotiation {
    fresh: bool,
    gzip: bool,
    head_only: bool,
}

impl Negotiation {
    fn read(req: &Request<Body>, entry: &CatalogEntry) -> Self {
        Self {
            fresh: is_fresh(req.headers(), entry),
            gzip: req
                .headers()
                .get(ACCEPT_ENCODING)
                .and_then(|h| h.to_str().ok())
                .is_some_and(core::accepts_gzip),
            head_only: req.method() == Method::HEAD,
        }
    }
}

fn is_fresh(headers: &HeaderMap, entry: &CatalogEntry) -> bool {
    if let Some(if_none_match) = headers.get(IF_NONE_MATCH).and_then(|h| h.to_str().ok()) {
        return core::etag_matches(if_none_match, &entry.etag);
    }
    headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
        .is_some_and(|since| core::not_modified_since(entry.modified, since))
}

#[async_trait]
impl Middleware for DirectoryHandler {
    fn middleware_name(&self) -> &str {
        "DirectoryHandler"
    }

    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> HandlerResult {
        if !matches!(*req.method(), Method::GET | Method::HEAD) {
            return next.run(req).await;
        }
        let Some(key) = core::map_request_path(req.uri().path(), &self.options.prefix) else {
            return next.run(req).await;
        };
        let Some(entry) = self.resolve(&key).await else {
            return next.run(req).await;
        };

        let wants = Negotiation::read(&req, &entry);
        match self.respond(&key, &entry, wants).await {
            Ok(resp) => {
                debug!(root = %self.root.display(), key = %key, status = %resp.status(), "served static file");
                Ok(resp)
            }
            Err(e) => {
                debug!(root = %self.root.display(), key = %key, error = %e, "dropping catalog entry");
                core::evict(&self.catalog, &key, self.layer);
                next.run(req).await
            }
        }
    }
}
