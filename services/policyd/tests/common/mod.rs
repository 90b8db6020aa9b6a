#![allow(dead_code)]

use async_trait::async_trait;
use gatehouse_authz::{Menu, MenuKind, MenuRef, MenuResource, PolicyEngine, Role, Status};
use gatehouse_cache::{CacheError, CacheResult, Cacher, ChangeSignal, MemoryCache};
use policyd::policy::PolicyError;
use policyd::policy::authorize::{Authorizer, PathRules};
use policyd::policy::compiler::PolicyCompiler;
use policyd::policy::enforcer::{CasbinEnforcerFactory, EnforcerFactory};
use policyd::policy::handle::EnforcerHandle;
use policyd::policy::publisher::ensure_model_file;
use policyd::policy::reload::{PolicySync, SyncSettings};
use policyd::store::memory::InMemoryStore;
use policyd::store::{RbacStore, StoreError, StoreResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, RwLock};

pub fn role(id: &str) -> Role {
    Role {
        id: id.to_string(),
        name: id.to_string(),
        status: Status::Enabled,
    }
}

pub fn menu(id: &str, code: &str, parent_id: &str, parent_path: &str, kind: MenuKind) -> Menu {
    Menu {
        id: id.to_string(),
        code: code.to_string(),
        name: code.to_string(),
        kind,
        parent_id: parent_id.to_string(),
        parent_path: parent_path.to_string(),
        status: Status::Enabled,
    }
}

pub fn resource(id: &str, menu_id: &str, method: &str, path: &str) -> MenuResource {
    MenuResource {
        id: id.to_string(),
        menu_id: menu_id.to_string(),
        method: method.to_string(),
        path: path.to_string(),
    }
}

/// `editor` holds the orders page M1; `exporter` holds only the export
/// button M2 under it.
pub async fn orders_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.upsert_role(role("editor")).await;
    store.upsert_role(role("exporter")).await;
    store
        .upsert_menu(menu("M1", "orders", "", "", MenuKind::Page))
        .await;
    store
        .upsert_menu(menu("M2", "orders.export", "M1", "M1.", MenuKind::Button))
        .await;
    for (id, menu_id, method, path) in [
        ("R1", "M1", "GET", "/api/v1/orders"),
        ("R2", "M1", "POST", "/api/v1/orders"),
        ("R3", "M2", "GET", "/api/v1/orders/export"),
    ] {
        store
            .upsert_resource(resource(id, menu_id, method, path))
            .await
            .expect("resource");
    }
    store.link_role_menu("editor", "M1").await.expect("link");
    store.link_role_menu("exporter", "M2").await.expect("link");
    store
}

pub const ORDERS_POLICY: &str = "p, editor, /api/v1/orders, GET\n\
p, editor, /api/v1/orders, POST\n\
p, exporter, /api/v1/orders, GET\n\
p, exporter, /api/v1/orders, POST\n\
p, exporter, /api/v1/orders/export, GET\n";

/// Delegates to the in-memory store but fails menu lookups for chosen roles.
pub struct FailingStore {
    pub inner: InMemoryStore,
    pub failing_roles: HashSet<String>,
}

#[async_trait]
impl RbacStore for FailingStore {
    async fn list_enabled_roles(&self) -> StoreResult<Vec<Role>> {
        self.inner.list_enabled_roles().await
    }

    async fn list_role_menus(&self, role_id: &str) -> StoreResult<Vec<MenuRef>> {
        if self.failing_roles.contains(role_id) {
            return Err(StoreError::Unexpected(anyhow::anyhow!(
                "injected failure for {role_id}"
            )));
        }
        self.inner.list_role_menus(role_id).await
    }

    async fn list_menus(&self, ids: &[String]) -> StoreResult<Vec<MenuRef>> {
        self.inner.list_menus(ids).await
    }

    async fn list_menu_resources(&self, menu_ids: &[String]) -> StoreResult<Vec<MenuResource>> {
        self.inner.list_menu_resources(menu_ids).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Memory cache whose reads can be switched to fail.
#[derive(Default)]
pub struct FlakyCache {
    pub inner: MemoryCache,
    pub failing: AtomicBool,
}

impl FlakyCache {
    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("injected outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Cacher for FlakyCache {
    async fn set(
        &self,
        ns: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.check()?;
        self.inner.set(ns, key, value, ttl).await
    }

    async fn get(&self, ns: &str, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        self.inner.get(ns, key).await
    }

    async fn delete(&self, ns: &str, key: &str) -> CacheResult<()> {
        self.check()?;
        self.inner.delete(ns, key).await
    }

    async fn get_and_delete(&self, ns: &str, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        self.inner.get_and_delete(ns, key).await
    }

    async fn health_check(&self) -> CacheResult<()> {
        self.check()
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Real Casbin factory with switches for failure, build counting and holding
/// a build in flight.
#[derive(Default)]
pub struct ControlledFactory {
    inner: CasbinEnforcerFactory,
    pub failing: AtomicBool,
    pub builds: AtomicUsize,
    pub entered: Notify,
    pub hold: RwLock<()>,
}

impl ControlledFactory {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EnforcerFactory for ControlledFactory {
    async fn build(
        &self,
        model_path: &Path,
        policy_path: &Path,
    ) -> Result<Arc<dyn PolicyEngine>, PolicyError> {
        self.entered.notify_one();
        let _held = self.hold.read().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(PolicyError::io(
                policy_path,
                std::io::Error::other("injected build failure"),
            ));
        }
        let engine = self.inner.build(model_path, policy_path).await?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(engine)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub cache: Arc<FlakyCache>,
    pub signal: ChangeSignal,
    pub handle: Arc<EnforcerHandle>,
    pub factory: Arc<ControlledFactory>,
    pub sync: Arc<PolicySync>,
    pub authorizer: Authorizer,
}

impl Harness {
    pub async fn new(store: Arc<dyn RbacStore>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let model_path = dir.path().join("rbac_model.conf");
        ensure_model_file(&model_path).await.expect("model");
        let cache = Arc::new(FlakyCache::default());
        let signal = ChangeSignal::with_defaults(cache.clone());
        let handle = Arc::new(EnforcerHandle::new());
        let factory = Arc::new(ControlledFactory::default());
        let sync = Arc::new(PolicySync::new(
            store,
            signal.clone(),
            factory.clone(),
            handle.clone(),
            SyncSettings {
                model_path,
                policy_path: dir.path().join("gen_rbac_policy.csv"),
                compiler: PolicyCompiler::new(2, 4),
            },
        ));
        let authorizer = Authorizer::new(handle.clone(), PathRules::default());
        Self {
            dir,
            cache,
            signal,
            handle,
            factory,
            sync,
            authorizer,
        }
    }

    pub fn policy_path(&self) -> PathBuf {
        self.dir.path().join("gen_rbac_policy.csv")
    }

    pub fn policy_file(&self) -> String {
        std::fs::read_to_string(self.policy_path()).expect("policy file")
    }

    pub fn allowed(&self, subject: &str, path: &str, method: &str) -> bool {
        self.authorizer
            .authorize(&[subject], path, method)
            .expect("decision")
            .is_allowed()
    }

    pub fn generation_id(&self) -> Option<u64> {
        self.handle.get().map(|generation| generation.id)
    }
}
