//! Offline-capable request interception cache.
//!
//! A [`Controller`] receives three signals from its host: install (populate the
//! offline namespace), activate (prune namespaces of older builds) and fetch
//! (classify the request and run one of the caching strategies).

pub mod cache;
pub mod classify;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod matcher;
pub mod network;
pub mod offline;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use cache::{CacheStorage, MemoryStorage, NamespaceManager, SqliteStorage};
pub use classify::{Classifier, Strategy};
pub use config::Config;
pub use http::{Request, RequestKey, Response};
pub use lifecycle::{Controller, FetchHandler, LifecycleState, PruneReport};
pub use network::{HttpNetwork, Network};
pub use strategy::{DetachedWrites, ResponseSource, Served};
