//! Resolve the full resource set one role is granted.
//!
//! A role receives the resources of every enabled menu linked to it plus the
//! resources of every ancestor of those menus, whether or not the ancestor is
//! linked itself. Ancestors come from each menu's materialized `parent_path`;
//! a `parent_id` the path does not mention (stale path) is fetched so its own
//! ancestors are followed too.
use super::PolicyError;
use crate::store::RbacStore;
use gatehouse_authz::{MenuRef, MenuResource, ancestor_ids};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct RoleResourceAggregator {
    store: Arc<dyn RbacStore>,
}

impl RoleResourceAggregator {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    /// Resources granted to `role_id`, deduplicated by `(method, path)` and
    /// sorted by that key.
    pub async fn resources(&self, role_id: &str) -> Result<Vec<MenuResource>, PolicyError> {
        let linked = self.store.list_role_menus(role_id).await?;
        if linked.is_empty() {
            return Ok(Vec::new());
        }
        let menu_ids = self.expand_ancestors(linked).await?;
        let menu_ids: Vec<String> = menu_ids.into_iter().collect();

        let mut resources = self.store.list_menu_resources(&menu_ids).await?;
        // Stable sort keeps the first row seen for each key.
        resources.sort_by(|a, b| a.key().cmp(&b.key()));
        resources.dedup_by(|a, b| a.key() == b.key());
        tracing::trace!(
            role_id,
            menus = menu_ids.len(),
            resources = resources.len(),
            "role resources resolved"
        );
        Ok(resources)
    }

    async fn expand_ancestors(&self, linked: Vec<MenuRef>) -> Result<BTreeSet<String>, PolicyError> {
        let mut ids: BTreeSet<String> = linked.iter().map(|menu| menu.id.clone()).collect();
        let mut frontier = linked;
        while !frontier.is_empty() {
            let mut to_fetch = Vec::new();
            for menu in &frontier {
                let named = ancestor_ids(&menu.parent_path);
                for ancestor in &named {
                    if !ids.contains(*ancestor) {
                        ids.insert((*ancestor).to_string());
                    }
                }
                let parent = menu.parent_id.as_str();
                if !parent.is_empty() && !named.contains(&parent) && ids.insert(parent.to_string()) {
                    to_fetch.push(parent.to_string());
                }
            }
            if to_fetch.is_empty() {
                break;
            }
            frontier = self.store.list_menus(&to_fetch).await?;
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::{StoreError, StoreResult};
    use async_trait::async_trait;
    use gatehouse_authz::{Menu, MenuKind, Role, Status};

    fn menu(id: &str, parent_id: &str, parent_path: &str) -> Menu {
        Menu {
            id: id.to_string(),
            code: id.to_string(),
            name: id.to_string(),
            kind: MenuKind::Page,
            parent_id: parent_id.to_string(),
            parent_path: parent_path.to_string(),
            status: Status::Enabled,
        }
    }

    fn resource(id: &str, menu_id: &str, method: &str, path: &str) -> MenuResource {
        MenuResource {
            id: id.to_string(),
            menu_id: menu_id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    async fn store_with_tree() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .upsert_role(Role {
                id: "exporter".to_string(),
                name: "Exporter".to_string(),
                status: Status::Enabled,
            })
            .await;
        store.upsert_menu(menu("m1", "", "")).await;
        store.upsert_menu(menu("m2", "m1", "m1.")).await;
        store.upsert_menu(menu("m3", "m2", "m1.m2.")).await;
        for (id, menu_id, method, path) in [
            ("r1", "m1", "GET", "/api/v1/orders"),
            ("r2", "m1", "POST", "/api/v1/orders"),
            ("r3", "m2", "GET", "/api/v1/orders/export"),
            ("r4", "m3", "GET", "/api/v1/orders/export/csv"),
        ] {
            store
                .upsert_resource(resource(id, menu_id, method, path))
                .await
                .expect("resource");
        }
        store
    }

    fn keys(resources: &[MenuResource]) -> Vec<(String, String)> {
        resources
            .iter()
            .map(|r| (r.method.clone(), r.path.clone()))
            .collect()
    }

    #[tokio::test]
    async fn descendant_link_inherits_every_ancestor() {
        let store = store_with_tree().await;
        store.link_role_menu("exporter", "m3").await.expect("link");
        let aggregator = RoleResourceAggregator::new(Arc::new(store));

        let resources = aggregator.resources("exporter").await.expect("resources");
        assert_eq!(resources.len(), 4);
    }

    #[tokio::test]
    async fn siblings_and_descendants_are_not_inherited() {
        let store = store_with_tree().await;
        store.link_role_menu("exporter", "m2").await.expect("link");
        let aggregator = RoleResourceAggregator::new(Arc::new(store));

        let resources = aggregator.resources("exporter").await.expect("resources");
        let keys = keys(&resources);
        assert!(!keys.contains(&("GET".to_string(), "/api/v1/orders/export/csv".to_string())));
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_method_path_pairs_collapse() {
        let store = store_with_tree().await;
        store
            .upsert_resource(resource("dup", "m2", "GET", "/api/v1/orders"))
            .await
            .expect("resource");
        store.link_role_menu("exporter", "m1").await.expect("link");
        store.link_role_menu("exporter", "m2").await.expect("link");
        let aggregator = RoleResourceAggregator::new(Arc::new(store));

        let resources = aggregator.resources("exporter").await.expect("resources");
        assert_eq!(
            keys(&resources),
            vec![
                ("GET".to_string(), "/api/v1/orders".to_string()),
                ("GET".to_string(), "/api/v1/orders/export".to_string()),
                ("POST".to_string(), "/api/v1/orders".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn stale_parent_path_is_backfilled_from_parent_id() {
        let store = store_with_tree().await;
        // m3 lost its materialized path but still names m2 as parent.
        store.upsert_menu(menu("m3", "m2", "")).await;
        store.link_role_menu("exporter", "m3").await.expect("link");
        let aggregator = RoleResourceAggregator::new(Arc::new(store));

        let resources = aggregator.resources("exporter").await.expect("resources");
        assert_eq!(resources.len(), 4);
    }

    #[tokio::test]
    async fn role_without_menus_has_no_resources() {
        let store = store_with_tree().await;
        let aggregator = RoleResourceAggregator::new(Arc::new(store));
        assert!(aggregator.resources("exporter").await.expect("resources").is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl RbacStore for BrokenStore {
        async fn list_enabled_roles(&self) -> StoreResult<Vec<Role>> {
            Ok(Vec::new())
        }
        async fn list_role_menus(&self, role_id: &str) -> StoreResult<Vec<MenuRef>> {
            Err(StoreError::NotFound(format!("role {role_id}")))
        }
        async fn list_menus(&self, _ids: &[String]) -> StoreResult<Vec<MenuRef>> {
            Ok(Vec::new())
        }
        async fn list_menu_resources(&self, _ids: &[String]) -> StoreResult<Vec<MenuResource>> {
            Ok(Vec::new())
        }
        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }
        fn is_durable(&self) -> bool {
            false
        }
        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn store_failures_surface_as_errors() {
        let aggregator = RoleResourceAggregator::new(Arc::new(BrokenStore));
        let err = aggregator.resources("editor").await.expect_err("store");
        assert!(matches!(err, PolicyError::Store(StoreError::NotFound(_))));
    }
}
