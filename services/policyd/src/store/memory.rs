//! In-memory implementation of [`RbacStore`].
//!
//! # Purpose
//! Backs local development (optionally seeded from YAML) and the test suite.
//! All tables live in `HashMap`s behind `tokio::sync::RwLock`, so the store
//! can be shared across tasks and mutated while a reload is reading it.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - Each query takes its own read lock; a reload pass racing with mutations
//!   may observe a mix of before/after rows across queries. The next change
//!   signal bump triggers another pass, so the compiled policy converges.
//!
//! # Cascading deletes
//! Deleting a menu removes its subtree (selected by `parent_path` prefix),
//! the subtree's resources, and any role links to it.
use super::{RbacStore, StoreError, StoreResult};
use async_trait::async_trait;
use gatehouse_authz::{Menu, MenuRef, MenuResource, Role, Status, child_parent_path};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default, Clone)]
pub struct InMemoryStore {
    roles: Arc<RwLock<HashMap<String, Role>>>,
    menus: Arc<RwLock<HashMap<String, Menu>>>,
    /// role id -> linked menu ids.
    role_menus: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    resources: Arc<RwLock<HashMap<String, MenuResource>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_role(&self, role: Role) {
        self.roles.write().await.insert(role.id.clone(), role);
    }

    pub async fn set_role_status(&self, role_id: &str, status: Status) -> StoreResult<()> {
        let mut roles = self.roles.write().await;
        let role = roles
            .get_mut(role_id)
            .ok_or_else(|| StoreError::NotFound(format!("role {role_id}")))?;
        role.status = status;
        Ok(())
    }

    pub async fn delete_role(&self, role_id: &str) -> StoreResult<()> {
        if self.roles.write().await.remove(role_id).is_none() {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        self.role_menus.write().await.remove(role_id);
        Ok(())
    }

    /// Insert or replace a menu exactly as given; `parent_path` is trusted.
    pub async fn upsert_menu(&self, menu: Menu) {
        self.menus.write().await.insert(menu.id.clone(), menu);
    }

    /// Insert a menu under `parent_id`, deriving its `parent_path`.
    pub async fn insert_child_menu(&self, parent_id: &str, mut menu: Menu) -> StoreResult<Menu> {
        let mut menus = self.menus.write().await;
        let parent = menus
            .get(parent_id)
            .ok_or_else(|| StoreError::NotFound(format!("menu {parent_id}")))?;
        if menus.contains_key(&menu.id) {
            return Err(StoreError::Conflict(format!("menu {}", menu.id)));
        }
        menu.parent_id = parent.id.clone();
        menu.parent_path = child_parent_path(parent);
        menus.insert(menu.id.clone(), menu.clone());
        Ok(menu)
    }

    pub async fn set_menu_status(&self, menu_id: &str, status: Status) -> StoreResult<()> {
        let mut menus = self.menus.write().await;
        let menu = menus
            .get_mut(menu_id)
            .ok_or_else(|| StoreError::NotFound(format!("menu {menu_id}")))?;
        menu.status = status;
        Ok(())
    }

    /// Delete a menu with its whole subtree, their resources and role links.
    pub async fn delete_menu(&self, menu_id: &str) -> StoreResult<usize> {
        let mut menus = self.menus.write().await;
        let menu = menus
            .get(menu_id)
            .ok_or_else(|| StoreError::NotFound(format!("menu {menu_id}")))?;
        let subtree_prefix = child_parent_path(menu);
        let doomed: HashSet<String> = menus
            .values()
            .filter(|candidate| {
                candidate.id == menu_id || candidate.parent_path.starts_with(&subtree_prefix)
            })
            .map(|candidate| candidate.id.clone())
            .collect();
        menus.retain(|id, _| !doomed.contains(id));
        drop(menus);

        self.resources
            .write()
            .await
            .retain(|_, resource| !doomed.contains(&resource.menu_id));
        for linked in self.role_menus.write().await.values_mut() {
            linked.retain(|id| !doomed.contains(id));
        }
        Ok(doomed.len())
    }

    pub async fn link_role_menu(&self, role_id: &str, menu_id: &str) -> StoreResult<()> {
        if !self.roles.read().await.contains_key(role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        if !self.menus.read().await.contains_key(menu_id) {
            return Err(StoreError::NotFound(format!("menu {menu_id}")));
        }
        self.role_menus
            .write()
            .await
            .entry(role_id.to_string())
            .or_default()
            .insert(menu_id.to_string());
        Ok(())
    }

    pub async fn unlink_role_menu(&self, role_id: &str, menu_id: &str) -> StoreResult<()> {
        let removed = self
            .role_menus
            .write()
            .await
            .get_mut(role_id)
            .is_some_and(|linked| linked.remove(menu_id));
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("link {role_id} -> {menu_id}")))
        }
    }

    pub async fn upsert_resource(&self, resource: MenuResource) -> StoreResult<()> {
        if !self.menus.read().await.contains_key(&resource.menu_id) {
            return Err(StoreError::NotFound(format!("menu {}", resource.menu_id)));
        }
        self.resources
            .write()
            .await
            .insert(resource.id.clone(), resource);
        Ok(())
    }

    pub async fn delete_resource(&self, resource_id: &str) -> StoreResult<()> {
        match self.resources.write().await.remove(resource_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("resource {resource_id}"))),
        }
    }
}

#[async_trait]
impl RbacStore for InMemoryStore {
    async fn list_enabled_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .roles
            .read()
            .await
            .values()
            .filter(|role| role.status == Status::Enabled)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(roles)
    }

    async fn list_role_menus(&self, role_id: &str) -> StoreResult<Vec<MenuRef>> {
        let linked = match self.role_menus.read().await.get(role_id) {
            Some(linked) => linked.clone(),
            None => return Ok(Vec::new()),
        };
        let menus = self.menus.read().await;
        Ok(linked
            .iter()
            .filter_map(|id| menus.get(id))
            .filter(|menu| menu.status == Status::Enabled)
            .map(Menu::to_ref)
            .collect())
    }

    async fn list_menus(&self, ids: &[String]) -> StoreResult<Vec<MenuRef>> {
        let menus = self.menus.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| menus.get(id))
            .map(Menu::to_ref)
            .collect())
    }

    async fn list_menu_resources(&self, menu_ids: &[String]) -> StoreResult<Vec<MenuResource>> {
        let wanted: HashSet<&str> = menu_ids.iter().map(String::as_str).collect();
        let mut resources: Vec<MenuResource> = self
            .resources
            .read()
            .await
            .values()
            .filter(|resource| wanted.contains(resource.menu_id.as_str()))
            .cloned()
            .collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(resources)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
