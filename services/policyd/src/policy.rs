//! Policy compilation and hot reload.
//!
//! # Purpose
//! Turns role -> menu -> resource assignments into Casbin policy lines, builds
//! a fresh engine from them, and swaps it into the [`handle::EnforcerHandle`]
//! that authorization checks read from.
//!
//! # How it fits
//! ```text
//! ChangeSignal ──tick──▶ reload::PolicySync
//!                          │ aggregator (per role, concurrent)
//!                          │ compiler   (bounded queue + worker pool)
//!                          │ publisher  (temp file + rename)
//!                          │ enforcer   (model + policy file -> engine)
//!                          ▼
//!                    handle::EnforcerHandle ◀── authorize::Authorizer
//! ```
//!
//! # Key invariants
//! - A pass either swaps in a complete generation or leaves the current one
//!   untouched.
//! - The read path never takes a lock.
//! - Only one pass runs at a time.
use crate::store::StoreError;
use gatehouse_authz::AuthzError;
use gatehouse_cache::SignalError;
use std::path::PathBuf;
use thiserror::Error;

pub mod aggregator;
pub mod authorize;
pub mod compiler;
pub mod enforcer;
pub mod handle;
pub mod publisher;
pub mod reload;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("compiled policy is empty")]
    EmptyPolicy,
    #[error("a policy reload is already in progress")]
    ReloadInProgress,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("change signal error: {0}")]
    Signal(#[from] SignalError),
    #[error("policy engine error: {0}")]
    Authz(#[from] AuthzError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("policy worker failed: {0}")]
    Worker(String),
    #[error("engine loaded {loaded} rules that do not match the {compiled} compiled lines")]
    RuleMismatch { compiled: usize, loaded: usize },
}

impl PolicyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PolicyError::Io {
            path: path.into(),
            source,
        }
    }
}
