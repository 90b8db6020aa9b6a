//! Gatehouse authorization primitives shared by the policy service and its callers.
//!
//! # Purpose
//! Defines the relational RBAC data model (roles, menus, menu resources), the
//! compiled policy line, the materialized tree-path helpers, and the embedded
//! Casbin model that the compiled policy is evaluated against.
//!
//! # How it fits
//! `policyd` reads roles/menus/resources through its stores, compiles them into
//! [`PolicyLine`]s, and builds a policy engine from [`casbin_model_string`]
//! plus the generated policy file. Authorization callers only see the
//! [`PolicyEngine`] seam.
//!
//! # Key invariants
//! - A menu's `parent_path` names every ancestor, each followed by [`TREE_PATH_DELIMITER`].
//! - Policy lines are totally ordered so compiled output is reproducible.
//!
//! # Examples
//! ```rust
//! use gatehouse_authz::{PolicyLine, ancestor_ids};
//!
//! assert_eq!(ancestor_ids("m1.m2."), vec!["m1", "m2"]);
//! let line = PolicyLine::new("editor", "/api/v1/orders", "GET");
//! assert_eq!(line.to_string(), "p, editor, /api/v1/orders, GET");
//! ```

mod casbin_model;
mod engine;
mod errors;
mod tree;
mod types;

pub use casbin_model::{casbin_model, casbin_model_string};
pub use engine::PolicyEngine;
pub use errors::{AuthzError, AuthzResult};
pub use tree::{TREE_PATH_DELIMITER, ancestor_ids, child_parent_path};
pub use types::{
    Menu, MenuKind, MenuRef, MenuResource, PolicyLine, RESERVED_FIELD_CHARS, Role, Status,
};
