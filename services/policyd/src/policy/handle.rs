//! The live policy engine, swappable without blocking readers.
//!
//! # Key invariants
//! - [`EnforcerHandle::get`] is lock-free and returns a whole generation; a
//!   caller keeps using that one generation for a whole decision.
//! - A generation is immutable. A replaced generation stays alive while any
//!   reader still holds it.
//! - `None` means nothing has loaded yet and must be treated as deny.
use arc_swap::ArcSwapOption;
use gatehouse_authz::{AuthzResult, PolicyEngine};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// One compiled-and-built policy engine.
pub struct Generation {
    pub id: u64,
    /// Change signal value the pass was started for, if any was set.
    pub signal: Option<i64>,
    pub lines: usize,
    pub built_at: SystemTime,
    engine: Arc<dyn PolicyEngine>,
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("signal", &self.signal)
            .field("lines", &self.lines)
            .field("built_at", &self.built_at)
            .finish_non_exhaustive()
    }
}

impl Generation {
    pub fn new(id: u64, signal: Option<i64>, lines: usize, engine: Arc<dyn PolicyEngine>) -> Self {
        Self {
            id,
            signal,
            lines,
            built_at: SystemTime::now(),
            engine,
        }
    }

    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> AuthzResult<bool> {
        self.engine.enforce(subject, object, action)
    }
}

#[derive(Default)]
pub struct EnforcerHandle {
    current: ArcSwapOption<Generation>,
    next_id: AtomicU64,
}

impl EnforcerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Generation>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// Replace the current generation, returning the previous one.
    pub fn swap(&self, generation: Arc<Generation>) -> Option<Arc<Generation>> {
        self.current.swap(Some(generation))
    }

    /// Wrap `engine` in a new generation with the next id and make it current.
    pub fn install(
        &self,
        engine: Arc<dyn PolicyEngine>,
        signal: Option<i64>,
        lines: usize,
    ) -> Arc<Generation> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let generation = Arc::new(Generation::new(id, signal, lines, engine));
        self.swap(Arc::clone(&generation));
        generation
    }
}
