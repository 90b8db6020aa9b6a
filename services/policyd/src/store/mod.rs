//! Read-side stores for roles, menus, role/menu links and menu resources.
//!
//! # Purpose
//! The policy compiler only needs four queries. They are grouped in one trait
//! so backends stay swappable (in-memory for dev/tests, Postgres for shared
//! deployments) and the compiler never sees SQL.
//!
//! # Key invariants
//! - `list_enabled_roles` and `list_role_menus` filter on enabled status.
//! - `list_menus` and `list_menu_resources` do not filter on status; ancestor
//!   backfill and resource lookup are by id only.
use async_trait::async_trait;
use gatehouse_authz::{MenuRef, MenuResource, Role};
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod seed;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn list_enabled_roles(&self) -> StoreResult<Vec<Role>>;
    async fn list_role_menus(&self, role_id: &str) -> StoreResult<Vec<MenuRef>>;
    async fn list_menus(&self, ids: &[String]) -> StoreResult<Vec<MenuRef>>;
    async fn list_menu_resources(&self, menu_ids: &[String]) -> StoreResult<Vec<MenuResource>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
