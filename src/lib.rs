//! Serve static files from several directories as if they were one, and
//! build cache-busted URLs for them.
//!
//! ```no_run
//! use smn_static_multi::{Pipeline, NotFound, ResolverConfig, RuntimeMode, StaticResolver};
//!
//! let resolver = StaticResolver::new(
//!     ResolverConfig::new(["static", "themes/dark/static"])
//!         .with_runtime_mode(RuntimeMode::from_env()),
//! );
//! let pipeline = Pipeline::new(NotFound).with(resolver.handler());
//! let href = resolver.cache_busted_path("css/site.css");
//! ```

pub mod error;
pub mod sys_chain;
pub mod sys_config;
pub mod sys_resolver;
pub mod sys_statichost;

pub use error::StaticError;
pub use sys_chain::{Endpoint, Middleware, Next, NotFound, PassThrough, Pipeline};
pub use sys_config::{ResolverConfig, RuntimeMode, StaticCacheOptions, load_config};
pub use sys_resolver::StaticResolver;
