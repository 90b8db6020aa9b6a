//! YAML seed data for the in-memory store.
//!
//! Menus are inserted exactly as written, including `parent_path`; the seed
//! file is the source of truth for the hierarchy.
use super::memory::InMemoryStore;
use super::StoreResult;
use anyhow::Context;
use gatehouse_authz::{Menu, MenuResource, Role};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub menus: Vec<Menu>,
    #[serde(default)]
    pub resources: Vec<MenuResource>,
    #[serde(default)]
    pub links: Vec<SeedLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedLink {
    pub role_id: String,
    pub menu_id: String,
}

impl SeedData {
    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(contents).context("parse seed yaml")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read seed file {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    /// Load everything into `store`. Menus go first so links and resources
    /// can reference them.
    pub async fn apply(self, store: &InMemoryStore) -> StoreResult<()> {
        let (roles, menus, resources, links) = (
            self.roles.len(),
            self.menus.len(),
            self.resources.len(),
            self.links.len(),
        );
        for role in self.roles {
            store.upsert_role(role).await;
        }
        for menu in self.menus {
            store.upsert_menu(menu).await;
        }
        for resource in self.resources {
            store.upsert_resource(resource).await?;
        }
        for link in self.links {
            store.link_role_menu(&link.role_id, &link.menu_id).await?;
        }
        tracing::info!(roles, menus, resources, links, "seed data applied");
        Ok(())
    }
}
