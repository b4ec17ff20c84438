use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::cache::EvictionPolicy;
use crate::clients::DEFAULT_MAX_CLIENTS;
use crate::error::{ProxyError, Result};
use crate::worker::{Manifest, NotificationTemplate, WorkerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub worker: WorkerSection,
    pub dynamic: DynamicConfig,
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 同时记录的客户端上限，超出时淘汰最久未出现的
    pub max_clients: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// 代理对外的源地址，也是清单路径的解析基准
    pub origin: String,
    /// 实际提供应用资源的上游服务器
    pub upstream: String,
    /// 缓存代的版本标签，生成 `static-<version>` 与 `dynamic-<version>`
    pub version: String,
    pub manifest: Vec<String>,
    pub offline_page: String,
    pub storage: StorageBackend,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    pub max_entries: Option<usize>,
    pub max_age_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8080/".to_string(),
            upstream: "http://127.0.0.1:4173/".to_string(),
            version: "v1".to_string(),
            manifest: [
                "./",
                "index.html",
                "manifest.json",
                "favicon.ico",
                "logo144.png",
                "logo192.png",
                "logo512.png",
                "screenshot1.png",
                "apple-touch-icon.png",
                "offline.html",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline_page: "offline.html".to_string(),
            storage: StorageBackend::Memory,
            cache_dir: "./cache".into(),
        }
    }
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(200),
            max_age_secs: None,
            sweep_interval_secs: 3600, // 1 hour
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Job Portal".to_string(),
            icon: "logo144.png".to_string(),
            badge: "logo144.png".to_string(),
            vibrate: vec![100, 50, 100],
            history: 50,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // 首先尝试从环境变量加载
        let config = match std::env::var("CONFIG_PATH") {
            Ok(config_path) => Self::from_file(&config_path)?,
            // 否则使用默认配置
            Err(_) => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProxyError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.origin()?;
        self.upstream()?;
        if self.worker.version.trim().is_empty() {
            return Err(ProxyError::Config("worker.version must not be empty".into()));
        }
        if self.worker.offline_page.trim().is_empty() {
            return Err(ProxyError::Config("worker.offline_page must not be empty".into()));
        }
        if self.server.max_clients == 0 {
            return Err(ProxyError::Config("server.max_clients must be positive".into()));
        }
        if self.dynamic.sweep_interval_secs == 0 {
            return Err(ProxyError::Config("dynamic.sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| ProxyError::Config(format!("invalid listen address: {}", e)))
    }

    pub fn origin(&self) -> Result<Url> {
        Url::parse(&self.worker.origin)
            .map_err(|e| ProxyError::Config(format!("invalid worker.origin: {}", e)))
    }

    pub fn upstream(&self) -> Result<Url> {
        Url::parse(&self.worker.upstream)
            .map_err(|e| ProxyError::Config(format!("invalid worker.upstream: {}", e)))
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_entries: self.dynamic.max_entries,
            max_age: self.dynamic.max_age_secs.map(Duration::from_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dynamic.sweep_interval_secs)
    }

    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let origin = self.origin()?;
        let manifest = Manifest::new(&origin, &self.worker.manifest, &self.worker.offline_page)?;
        Ok(WorkerConfig {
            origin,
            version: self.worker.version.clone(),
            manifest,
            eviction: self.eviction_policy(),
            notification: NotificationTemplate {
                title: self.notification.title.clone(),
                icon: self.notification.icon.clone(),
                badge: self.notification.badge.clone(),
                vibrate: self.notification.vibrate.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert_eq!(config.notification.vibrate, vec![100, 50, 100]);
        assert!(config.worker.manifest.iter().all(|p| !p.starts_with("/src/")));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [worker]
            version = "v2"
            storage = "disk"
            cache_dir = "/var/cache/portal"

            [dynamic]
            max_entries = 50
            max_age_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.version, "v2");
        assert_eq!(config.worker.storage, StorageBackend::Disk);
        assert_eq!(config.worker.offline_page, "offline.html");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_clients, DEFAULT_MAX_CLIENTS);

        let policy = config.eviction_policy();
        assert_eq!(policy.max_entries, Some(50));
        assert_eq!(policy.max_age, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_invalid_origin_is_rejected() {
        let config = Config::from_toml("[worker]\norigin = \"not a url\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_worker_config_names_generations() {
        let worker = Config::default().worker_config().unwrap();
        let names = worker.generation_names();
        assert_eq!(names.static_name, "static-v1");
        assert_eq!(names.dynamic_name, "dynamic-v1");
        assert_eq!(worker.notification.title, "Job Portal");
    }
}
