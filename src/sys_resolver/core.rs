use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hyper::{Body, Request};
use tracing::{debug, warn};

use crate::sys_chain::{Chain, HandlerResult, Middleware, Next, PassThrough};
use crate::sys_config::{ResolvedOptions, ResolverConfig};
use crate::sys_statichost::{DirectoryHandler, SharedCatalog, core::epoch_millis, new_catalog};

/// Serves several directories as one and builds cache-busted asset URLs.
///
/// When two directories hold the same served path, the one registered last
/// answers requests. [`StaticResolver::cache_busted_path`] looks the other
/// way and takes the first directory that has the file. Existing pages embed
/// those URLs, so the two orders are kept as they are.
pub struct StaticResolver {
    dirs: Vec<PathBuf>,
    catalog: SharedCatalog,
    options: Arc<ResolvedOptions>,
    handler: Arc<dyn Middleware>,
}

impl StaticResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let options = Arc::new(config.resolved_options());
        let catalog = new_catalog();
        let dirs = config.dirs;

        // Highest priority first: the last directory is the entry point and
        // every step falls back to the one registered before it.
        let mut steps: Vec<Arc<dyn Middleware>> = dirs
            .iter()
            .enumerate()
            .map(|(layer, dir)| {
                Arc::new(DirectoryHandler::new(
                    dir.clone(),
                    layer,
                    catalog.clone(),
                    options.clone(),
                )) as Arc<dyn Middleware>
            })
            .collect();
        steps.reverse();

        let handler: Arc<dyn Middleware> = if steps.is_empty() {
            warn!("StaticResolver created with no directories; every request will pass through");
            Arc::new(PassThrough)
        } else {
            debug!(
                dirs = ?dirs,
                revalidate = options.revalidate_on_every_request,
                compress = options.compress,
                max_age = options.max_age_seconds,
                "static resolver ready"
            );
            Arc::new(Chain::new("StaticResolver", steps))
        };

        Self {
            dirs,
            catalog,
            options,
            handler,
        }
    }

    /// The request handler to mount in a pipeline.
    pub fn handler(&self) -> Arc<dyn Middleware> {
        self.handler.clone()
    }

    /// Directories in registration order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    /// `asset_path` with `?mtime=<epoch ms>` appended, taken from the first
    /// directory (in registration order) where the path exists. Returns the
    /// input untouched when no directory has it.
    ///
    /// Blocks on a filesystem stat per directory tried.
    pub fn cache_busted_path(&self, asset_path: &str) -> String {
        let relative = Path::new(asset_path.trim_start_matches('/'));
        for dir in &self.dirs {
            let on_disk = dir.join(relative);
            // A failure here only means the asset is not in this directory.
            if let Ok(modified) = std::fs::metadata(&on_disk).and_then(|m| m.modified()) {
                return format!("{asset_path}?mtime={}", epoch_millis(modified));
            }
        }
        asset_path.to_string()
    }
}

#[async_trait]
impl Middleware for StaticResolver {
    fn middleware_name(&self) -> &str {
        self.handler.middleware_name()
    }

    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> HandlerResult {
        self.handler.handle(req, next).await
    }
}
