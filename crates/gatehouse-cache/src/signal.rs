//! Poll-based change marker for role/menu/resource assignments.
//!
//! # Purpose
//! Writers call [`ChangeSignal::bump`] after any mutation that can change a
//! role's effective grants. The policy reload loop calls [`ChangeSignal::read`]
//! on every tick and recompiles when the value is newer than the last one it
//! applied.
//!
//! # Key invariants
//! - The stored value is a decimal integer (microseconds since the Unix epoch).
//! - Values are strictly increasing per writer: a bump never writes a value
//!   less than or equal to the one it observed, even inside one clock tick.
//! - Readers never clear the value; level-triggered polling tolerates missed
//!   ticks.
//!
//! # Common pitfalls
//! - Bumps from several processes race on read-modify-write; the marker stays
//!   monotonic only up to clock skew between writers. Consumers must treat it
//!   as "something changed", never as an exact event count.
use crate::{CacheError, Cacher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_SIGNAL_NAMESPACE: &str = "role";
pub const DEFAULT_SIGNAL_KEY: &str = "sync:casbin";

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("change signal unavailable: {0}")]
    Cache(#[from] CacheError),
    #[error("change signal value {value:?} is not a timestamp")]
    Parse { value: String },
}

#[derive(Clone)]
pub struct ChangeSignal {
    cache: Arc<dyn Cacher>,
    namespace: String,
    key: String,
}

impl std::fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("backend", &self.cache.backend_name())
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .finish()
    }
}

impl ChangeSignal {
    pub fn new(
        cache: Arc<dyn Cacher>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    pub fn with_defaults(cache: Arc<dyn Cacher>) -> Self {
        Self::new(cache, DEFAULT_SIGNAL_NAMESPACE, DEFAULT_SIGNAL_KEY)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current marker, or `None` if nothing has been written yet.
    pub async fn read(&self) -> Result<Option<i64>, SignalError> {
        let Some(value) = self.cache.get(&self.namespace, &self.key).await? else {
            return Ok(None);
        };
        value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| SignalError::Parse { value })
    }

    /// Record that assignments changed and return the marker written.
    ///
    /// An unparsable existing value is overwritten rather than reported, so a
    /// corrupted marker heals on the next mutation.
    pub async fn bump(&self) -> Result<i64, SignalError> {
        let current = match self.read().await {
            Ok(current) => current,
            Err(SignalError::Parse { value }) => {
                tracing::warn!(value = %value, "overwriting malformed change signal");
                None
            }
            Err(err) => return Err(err),
        };
        let next = next_marker(now_micros(), current);
        self.cache
            .set(&self.namespace, &self.key, &next.to_string(), None)
            .await?;
        tracing::debug!(
            namespace = %self.namespace,
            key = %self.key,
            marker = next,
            "change signal bumped"
        );
        Ok(next)
    }
}

fn next_marker(now: i64, current: Option<i64>) -> i64 {
    match current {
        Some(current) if current >= now => current.saturating_add(1),
        _ => now,
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
