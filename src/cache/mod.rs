//! Versioned cache store.
//!
//! This module provides the request/response store the strategies read and write:
//! - Entries are grouped into named namespaces (`<version>:<purpose>`)
//! - Entries are keyed by request identity (method + URL) and overwritten wholesale
//! - Namespaces are created lazily on open and deleted in bulk on activation
//! - Lookups can be scoped to one namespace or search all of them

mod namespace;
mod storage;
mod traits;

pub use namespace::{NamespaceManager, OFFLINE, RESOURCES};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheStorage, CachedResponse};
