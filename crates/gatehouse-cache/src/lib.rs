//! Namespaced key/value cache and the change signal built on top of it.
//!
//! # Purpose
//! Role/menu mutation handlers and the policy reload loop never talk to each
//! other directly. Mutations bump a timestamp under a well-known cache key;
//! the reload loop polls it. This crate owns both halves of that contract.
//!
//! # Key invariants
//! - Keys are scoped as `<namespace><delimiter><key>`; namespaces never collide.
//! - The change signal is never cleared by readers, so a missed poll cannot
//!   lose a pending change.
//!
//! # Examples
//! ```
//! use gatehouse_cache::{ChangeSignal, MemoryCache};
//! use std::sync::Arc;
//!
//! let rt = tokio::runtime::Runtime::new().expect("rt");
//! rt.block_on(async {
//!     let signal = ChangeSignal::with_defaults(Arc::new(MemoryCache::new()));
//!     assert_eq!(signal.read().await.expect("read"), None);
//!     let stamp = signal.bump().await.expect("bump");
//!     assert_eq!(signal.read().await.expect("read"), Some(stamp));
//! });
//! ```
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod memory;
mod signal;

pub use memory::MemoryCache;
pub use signal::{ChangeSignal, DEFAULT_SIGNAL_KEY, DEFAULT_SIGNAL_NAMESPACE, SignalError};

pub const DEFAULT_DELIMITER: &str = ":";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// String key/value cache partitioned by namespace.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Store `value`, replacing any previous entry. `ttl = None` never expires.
    async fn set(&self, ns: &str, key: &str, value: &str, ttl: Option<Duration>)
    -> CacheResult<()>;
    async fn get(&self, ns: &str, key: &str) -> CacheResult<Option<String>>;
    async fn exists(&self, ns: &str, key: &str) -> CacheResult<bool> {
        Ok(self.get(ns, key).await?.is_some())
    }
    async fn delete(&self, ns: &str, key: &str) -> CacheResult<()>;
    async fn get_and_delete(&self, ns: &str, key: &str) -> CacheResult<Option<String>>;
    async fn health_check(&self) -> CacheResult<()>;
    fn backend_name(&self) -> &'static str;
}

/// Join a namespace and key into the flat key a backend stores.
pub fn scoped_key(delimiter: &str, ns: &str, key: &str) -> String {
    format!("{ns}{delimiter}{key}")
}
