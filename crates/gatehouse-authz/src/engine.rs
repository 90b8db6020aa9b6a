//! The seam between compiled policy data and the external evaluation engine.
//!
//! # Purpose
//! Authorization callers evaluate `(subject, object, action)` triples without
//! knowing which engine sits behind them. Production uses Casbin; tests may
//! substitute lightweight engines to observe generation swaps.
//!
//! # Key invariants
//! - Implementations are immutable after construction and safe to share
//!   across threads; evaluation takes `&self` and never blocks on a reload.
use crate::errors::AuthzResult;
use casbin::{CoreApi, Enforcer, MgmtApi};

/// Evaluates a single authorization request.
pub trait PolicyEngine: Send + Sync {
    /// Returns `true` when `subject` may perform `action` on `object`.
    fn enforce(&self, subject: &str, object: &str, action: &str) -> AuthzResult<bool>;

    /// Every `p` rule the engine holds, one field per element.
    fn rules(&self) -> Vec<Vec<String>>;
}

impl PolicyEngine for Enforcer {
    fn enforce(&self, subject: &str, object: &str, action: &str) -> AuthzResult<bool> {
        Ok(CoreApi::enforce(self, (subject, object, action))?)
    }

    fn rules(&self) -> Vec<Vec<String>> {
        self.get_policy()
    }
}
