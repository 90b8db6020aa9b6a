//! Policy compilation and hot-reload service library crate.
//!
//! # Purpose
//! Exposes the RBAC stores, the policy pipeline, configuration, observability
//! and the ops router for use by the binary and tests.
pub mod app;
pub mod config;
pub mod observability;
pub mod policy;
pub mod store;
