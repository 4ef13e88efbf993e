//! Option defaulting and config loading: no Hyper types here.

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StaticError};

/// One year, in seconds.
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Which kind of deployment the resolver runs in. Only used to pick the
/// revalidation default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Production,
    #[default]
    Development,
}

impl RuntimeMode {
    /// Reads `SMN_ENV` (or `smn_env`). Anything other than `production`
    /// counts as development.
    pub fn from_env() -> Self {
        env::var("SMN_ENV")
            .or_else(|_| env::var("smn_env"))
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            RuntimeMode::Production
        } else {
            RuntimeMode::Development
        }
    }

    pub fn is_production(self) -> bool {
        self == RuntimeMode::Production
    }
}

/// Caller-facing options. Every field is optional; see
/// [`StaticCacheOptions::resolve`] for the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StaticCacheOptions {
    /// Re-check the filesystem on every request instead of trusting the catalog.
    #[serde(alias = "dynamic")]
    pub revalidate_on_every_request: Option<bool>,
    /// Offer gzip-encoded representations.
    #[serde(alias = "gzip")]
    pub compress: Option<bool>,
    /// Advertised `max-age`.
    #[serde(alias = "max_age")]
    pub max_age_seconds: Option<u64>,
    /// URL prefix the handlers answer under, e.g. `/static`.
    pub prefix: Option<String>,
    /// Walk every directory into the catalog at construction.
    pub preload: Option<bool>,
    /// Keep file bytes in the catalog instead of streaming from disk.
    pub buffer: Option<bool>,
    /// Replaces the generated `Cache-Control` value.
    pub cache_control: Option<String>,
}

/// Options after defaulting. Shared by every handler in one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub revalidate_on_every_request: bool,
    pub compress: bool,
    pub max_age_seconds: u64,
    pub prefix: String,
    pub preload: bool,
    pub buffer: bool,
    pub cache_control: String,
}

impl StaticCacheOptions {
    pub fn resolve(&self, mode: RuntimeMode) -> ResolvedOptions {
        let max_age_seconds = self.max_age_seconds.unwrap_or(DEFAULT_MAX_AGE_SECONDS);
        ResolvedOptions {
            revalidate_on_every_request: self
                .revalidate_on_every_request
                .unwrap_or(!mode.is_production()),
            compress: self.compress.unwrap_or(true),
            max_age_seconds,
            prefix: normalize_prefix(self.prefix.as_deref().unwrap_or_default()),
            preload: self.preload.unwrap_or(true),
            buffer: self.buffer.unwrap_or(false),
            cache_control: self
                .cache_control
                .clone()
                .unwrap_or_else(|| format!("public, max-age={max_age_seconds}")),
        }
    }
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        StaticCacheOptions::default().resolve(RuntimeMode::default())
    }
}

/// `static/` and `/static/` both become `/static`; blank stays blank.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Everything the resolver needs at construction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverConfig {
    /// Registration order; later entries win when serving.
    pub dirs: Vec<PathBuf>,
    #[serde(default)]
    pub static_cache_options: Option<StaticCacheOptions>,
    /// Set by the embedding program, never read from the config file.
    #[serde(skip)]
    pub runtime_mode: RuntimeMode,
}

impl ResolverConfig {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: StaticCacheOptions) -> Self {
        self.static_cache_options = Some(options);
        self
    }

    pub fn with_runtime_mode(mut self, mode: RuntimeMode) -> Self {
        self.runtime_mode = mode;
        self
    }

    pub fn resolved_options(&self) -> ResolvedOptions {
        self.static_cache_options
            .clone()
            .unwrap_or_default()
            .resolve(self.runtime_mode)
    }
}

/// Load a resolver config from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ResolverConfig> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| StaticError::io(path, e))?;
    let reader = BufReader::new(file);
    let config: ResolverConfig = serde_json::from_reader(reader)?;
    Ok(config)
}
