//! Several directories merged behind one handler, plus cache-busted URLs.

pub mod core;

pub use self::core::StaticResolver;
