//! Single-directory file serving over a catalog that several directories share.

pub mod core;
pub mod handlers;

pub use self::core::{CatalogEntry, SharedCatalog, new_catalog};
pub use self::handlers::DirectoryHandler;
