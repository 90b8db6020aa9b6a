use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LOAD_WORKERS: usize = 2;
const DEFAULT_QUEUE_DEPTH: usize = 64;
const DEFAULT_RELOAD_INTERVAL_MS: u64 = 3000;
const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres,
}

impl Backend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            other => bail!("unknown backend {other:?}; expected memory or postgres"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

// Policy service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct PolicydConfig {
    // Ops HTTP listener (health, policy status, manual reload).
    pub bind_addr: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // When false the service serves ops endpoints but never loads a policy.
    pub enabled: bool,
    pub work_dir: PathBuf,
    // Relative paths resolve against `work_dir`.
    pub model_file: PathBuf,
    pub policy_file: PathBuf,
    pub load_workers: usize,
    pub queue_depth: usize,
    pub reload_interval_ms: u64,
    pub signal_namespace: String,
    pub signal_key: String,
    pub storage: Backend,
    pub cache: Backend,
    pub postgres: Option<PostgresConfig>,
    // YAML seed applied to the memory store at startup.
    pub seed_file: Option<PathBuf>,
    pub allowed_path_prefixes: Vec<String>,
    pub skipped_path_prefixes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PolicydConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    enabled: Option<bool>,
    work_dir: Option<String>,
    model_file: Option<String>,
    policy_file: Option<String>,
    load_workers: Option<usize>,
    queue_depth: Option<usize>,
    reload_interval_ms: Option<u64>,
    signal_namespace: Option<String>,
    signal_key: Option<String>,
    storage: Option<String>,
    cache: Option<String>,
    postgres: Option<PostgresOverride>,
    seed_file: Option<String>,
    allowed_path_prefixes: Option<Vec<String>>,
    skipped_path_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PostgresOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

fn env_positive<T: std::str::FromStr + PartialOrd + Default>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl PolicydConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("POLICYD_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string())
            .parse()
            .with_context(|| "parse POLICYD_BIND")?;
        let metrics_bind = std::env::var("POLICYD_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse POLICYD_METRICS_BIND")?;
        let storage = Backend::parse(
            &std::env::var("POLICYD_STORAGE").unwrap_or_else(|_| "memory".to_string()),
        )
        .with_context(|| "parse POLICYD_STORAGE")?;
        let cache = Backend::parse(
            &std::env::var("POLICYD_CACHE").unwrap_or_else(|_| "memory".to_string()),
        )
        .with_context(|| "parse POLICYD_CACHE")?;
        let postgres = std::env::var("POLICYD_PG_URL")
            .ok()
            .map(|url| PostgresConfig {
                url,
                max_connections: env_positive(
                    "POLICYD_PG_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS,
                ),
                acquire_timeout_ms: env_positive(
                    "POLICYD_PG_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
                ),
            });
        Ok(Self {
            bind_addr,
            metrics_bind,
            enabled: env_flag("POLICYD_ENABLED", true),
            work_dir: std::env::var("POLICYD_WORK_DIR")
                .unwrap_or_else(|_| "data".to_string())
                .into(),
            model_file: std::env::var("POLICYD_MODEL_FILE")
                .unwrap_or_else(|_| "rbac_model.conf".to_string())
                .into(),
            policy_file: std::env::var("POLICYD_POLICY_FILE")
                .unwrap_or_else(|_| "gen_rbac_policy.csv".to_string())
                .into(),
            load_workers: env_positive("POLICYD_LOAD_WORKERS", DEFAULT_LOAD_WORKERS),
            queue_depth: env_positive("POLICYD_QUEUE_DEPTH", DEFAULT_QUEUE_DEPTH),
            reload_interval_ms: env_positive(
                "POLICYD_RELOAD_INTERVAL_MS",
                DEFAULT_RELOAD_INTERVAL_MS,
            ),
            signal_namespace: std::env::var("POLICYD_SIGNAL_NAMESPACE")
                .unwrap_or_else(|_| gatehouse_cache::DEFAULT_SIGNAL_NAMESPACE.to_string()),
            signal_key: std::env::var("POLICYD_SIGNAL_KEY")
                .unwrap_or_else(|_| gatehouse_cache::DEFAULT_SIGNAL_KEY.to_string()),
            storage,
            cache,
            postgres,
            seed_file: std::env::var("POLICYD_SEED_FILE").ok().map(PathBuf::from),
            allowed_path_prefixes: env_list("POLICYD_ALLOWED_PATH_PREFIXES"),
            skipped_path_prefixes: env_list("POLICYD_SKIPPED_PATH_PREFIXES"),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("POLICYD_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read POLICYD_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: PolicydConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse policyd config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.enabled {
            self.enabled = value;
        }
        if let Some(value) = override_cfg.work_dir {
            self.work_dir = value.into();
        }
        if let Some(value) = override_cfg.model_file {
            self.model_file = value.into();
        }
        if let Some(value) = override_cfg.policy_file {
            self.policy_file = value.into();
        }
        if let Some(value) = override_cfg.load_workers.filter(|value| *value > 0) {
            self.load_workers = value;
        }
        if let Some(value) = override_cfg.queue_depth.filter(|value| *value > 0) {
            self.queue_depth = value;
        }
        if let Some(value) = override_cfg.reload_interval_ms.filter(|value| *value > 0) {
            self.reload_interval_ms = value;
        }
        if let Some(value) = override_cfg.signal_namespace {
            self.signal_namespace = value;
        }
        if let Some(value) = override_cfg.signal_key {
            self.signal_key = value;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = Backend::parse(&value).with_context(|| "parse storage")?;
        }
        if let Some(value) = override_cfg.cache {
            self.cache = Backend::parse(&value).with_context(|| "parse cache")?;
        }
        if let Some(pg) = override_cfg.postgres {
            let mut current = self.postgres.take().unwrap_or(PostgresConfig {
                url: String::new(),
                max_connections: DEFAULT_PG_MAX_CONNECTIONS,
                acquire_timeout_ms: DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
            });
            if let Some(url) = pg.url {
                current.url = url;
            }
            if let Some(value) = pg.max_connections.filter(|value| *value > 0) {
                current.max_connections = value;
            }
            if let Some(value) = pg.acquire_timeout_ms.filter(|value| *value > 0) {
                current.acquire_timeout_ms = value;
            }
            self.postgres = Some(current);
        }
        if let Some(value) = override_cfg.seed_file {
            self.seed_file = Some(value.into());
        }
        if let Some(value) = override_cfg.allowed_path_prefixes {
            self.allowed_path_prefixes = value;
        }
        if let Some(value) = override_cfg.skipped_path_prefixes {
            self.skipped_path_prefixes = value;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let needs_pg = self.storage == Backend::Postgres || self.cache == Backend::Postgres;
        let has_url = self
            .postgres
            .as_ref()
            .is_some_and(|pg| !pg.url.trim().is_empty());
        if needs_pg && !has_url {
            bail!("postgres storage or cache selected but POLICYD_PG_URL is not set");
        }
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.work_dir.join(&self.model_file)
    }

    pub fn policy_path(&self) -> PathBuf {
        self.work_dir.join(&self.policy_file)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }
}
