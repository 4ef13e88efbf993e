//! Options for the per-directory handlers and the resolver input.

pub mod core;

pub use self::core::{
    DEFAULT_MAX_AGE_SECONDS, ResolvedOptions, ResolverConfig, RuntimeMode, StaticCacheOptions,
    load_config,
};
