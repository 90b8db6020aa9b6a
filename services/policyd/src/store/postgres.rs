//! Postgres-backed [`RbacStore`] and [`Cacher`].
//!
//! # Purpose
//! Shared deployments keep role/menu data in Postgres, and several policyd
//! replicas must observe one change signal. Both live in the same database:
//! the RBAC tables for [`PostgresStore`], and `cache_entries` for
//! [`PostgresCache`].
//!
//! # Key invariants
//! - Migrations run before the store is handed out; queries assume the schema.
//! - Reads are single statements; a reload pass may see rows from different
//!   commits across its queries and relies on the next signal bump to converge.
//! - Expired cache rows are invisible to reads and are purged lazily on write.
//!
//! # Security notes
//! - The connection URL may contain credentials; it is never logged.
//! - All SQL is static with bound parameters.
use super::{RbacStore, StoreResult};
use crate::config::PostgresConfig;
use async_trait::async_trait;
use gatehouse_authz::{MenuRef, MenuResource, Role, Status};
use gatehouse_cache::{CacheError, CacheResult, Cacher, DEFAULT_DELIMITER, scoped_key};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    id: String,
    name: String,
    status: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbMenuRef {
    id: String,
    parent_id: String,
    parent_path: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbMenuResource {
    id: String,
    menu_id: String,
    method: String,
    path: String,
}

impl From<DbRole> for Role {
    fn from(row: DbRole) -> Self {
        Role {
            id: row.id,
            name: row.name,
            status: Status::parse(&row.status).unwrap_or(Status::Disabled),
        }
    }
}

impl From<DbMenuRef> for MenuRef {
    fn from(row: DbMenuRef) -> Self {
        MenuRef {
            id: row.id,
            parent_id: row.parent_id,
            parent_path: row.parent_path,
        }
    }
}

impl From<DbMenuResource> for MenuResource {
    fn from(row: DbMenuResource) -> Self {
        MenuResource {
            id: row.id,
            menu_id: row.menu_id,
            method: row.method,
            path: row.path,
        }
    }
}

/// Open a pool and apply embedded migrations.
pub async fn connect_pool(pg: &PostgresConfig) -> StoreResult<PgPool> {
    // Bounded acquire so a wedged database surfaces as reload failures instead
    // of a reload that never finishes.
    let connect_options = PgConnectOptions::from_str(&pg.url)?;
    let pool = PgPoolOptions::new()
        .max_connections(pg.max_connections)
        .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
        .connect_with(connect_options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RbacStore for PostgresStore {
    async fn list_enabled_roles(&self) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(
            "SELECT id, name, status FROM roles WHERE status = $1 ORDER BY id",
        )
        .bind(Status::Enabled.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn list_role_menus(&self, role_id: &str) -> StoreResult<Vec<MenuRef>> {
        let rows = sqlx::query_as::<_, DbMenuRef>(
            "SELECT m.id, m.parent_id, m.parent_path \
             FROM role_menus rm JOIN menus m ON m.id = rm.menu_id \
             WHERE rm.role_id = $1 AND m.status = $2 \
             ORDER BY m.id",
        )
        .bind(role_id)
        .bind(Status::Enabled.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MenuRef::from).collect())
    }

    async fn list_menus(&self, ids: &[String]) -> StoreResult<Vec<MenuRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbMenuRef>(
            "SELECT id, parent_id, parent_path FROM menus WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MenuRef::from).collect())
    }

    async fn list_menu_resources(&self, menu_ids: &[String]) -> StoreResult<Vec<MenuResource>> {
        if menu_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbMenuResource>(
            "SELECT id, menu_id, method, path FROM menu_resources \
             WHERE menu_id = ANY($1) ORDER BY id",
        )
        .bind(menu_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MenuResource::from).collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// [`Cacher`] over the `cache_entries` table.
#[derive(Debug, Clone)]
pub struct PostgresCache {
    pool: PgPool,
    delimiter: String,
}

impl PostgresCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }

    fn key(&self, ns: &str, key: &str) -> String {
        scoped_key(&self.delimiter, ns, key)
    }
}

fn cache_error(err: sqlx::Error) -> CacheError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            CacheError::Unavailable(err.to_string())
        }
        other => CacheError::Backend(other.to_string()),
    }
}

#[async_trait]
impl Cacher for PostgresCache {
    async fn set(
        &self,
        ns: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        sqlx::query(
            "INSERT INTO cache_entries (scoped_key, value, expires_at) \
             VALUES ($1, $2, CASE WHEN $3::float8 IS NULL THEN NULL \
                                  ELSE now() + make_interval(secs => $3::float8) END) \
             ON CONFLICT (scoped_key) DO UPDATE \
             SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(self.key(ns, key))
        .bind(value)
        .bind(ttl.map(|ttl| ttl.as_secs_f64()))
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;
        Ok(())
    }

    async fn get(&self, ns: &str, key: &str) -> CacheResult<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT value FROM cache_entries \
             WHERE scoped_key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(self.key(ns, key))
        .fetch_optional(&self.pool)
        .await
        .map_err(cache_error)
    }

    async fn delete(&self, ns: &str, key: &str) -> CacheResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE scoped_key = $1")
            .bind(self.key(ns, key))
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn get_and_delete(&self, ns: &str, key: &str) -> CacheResult<Option<String>> {
        let row: Option<(String, bool)> = sqlx::query_as(
            "DELETE FROM cache_entries WHERE scoped_key = $1 \
             RETURNING value, (expires_at IS NULL OR expires_at > now())",
        )
        .bind(self.key(ns, key))
        .fetch_optional(&self.pool)
        .await
        .map_err(cache_error)?;
        Ok(row.and_then(|(value, live)| live.then_some(value)))
    }

    async fn health_check(&self) -> CacheResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_rows_are_treated_as_disabled() {
        let role = Role::from(DbRole {
            id: "r".to_string(),
            name: "R".to_string(),
            status: "archived".to_string(),
        });
        assert_eq!(role.status, Status::Disabled);
    }

    #[test]
    fn pool_errors_map_to_unavailable() {
        assert!(matches!(
            cache_error(sqlx::Error::PoolTimedOut),
            CacheError::Unavailable(_)
        ));
        assert!(matches!(
            cache_error(sqlx::Error::RowNotFound),
            CacheError::Backend(_)
        ));
    }
}
