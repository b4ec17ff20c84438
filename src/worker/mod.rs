//! 离线资源缓存代理。
//!
//! `OfflineProxy` 响应宿主驱动的四类事件：
//!
//! - `install`：把清单中的资源原子地写入静态代；
//! - `activate`：删除白名单外的旧代并接管所有客户端；
//! - `fetch`：同源 GET 请求走「缓存优先、网络回退」，成功的同源 200 响应写入动态代；
//! - `push`：把推送载荷转成用户可见的通知。
//!
//! 缓存写入在后台任务中完成，宿主在拆除代理前须调用 [`OfflineProxy::wait_until_idle`]。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, EvictionPolicy};
use crate::clients::ClientRegistry;
use crate::error::{ProxyError, Result};
use crate::network::Fetcher;
use crate::notification::{NotificationData, NotificationOptions, Notifier, PushEvent};
use crate::request::{CacheKey, RequestMode, ResourceRequest, ResponseSnapshot};
use crate::utils;

mod lifecycle;
mod manifest;

pub use lifecycle::LifecycleState;
pub use manifest::{GenerationNames, Manifest};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub origin: Url,
    pub version: String,
    pub manifest: Manifest,
    pub eviction: EvictionPolicy,
    pub notification: NotificationTemplate,
}

impl WorkerConfig {
    pub fn generation_names(&self) -> GenerationNames {
        GenerationNames::for_version(&self.version)
    }
}

/// 推送通知的固定部分
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationTemplate {
    pub title: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

/// 代理对一次请求的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FetchDisposition {
    /// 不拦截，由宿主直接访问网络
    PassThrough,
    Respond(ResponseSnapshot),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub purged: Vec<String>,
    pub failed: Vec<String>,
    pub claimed: usize,
}

pub struct OfflineProxy {
    config: WorkerConfig,
    names: GenerationNames,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    clients: Arc<ClientRegistry>,
    state: Arc<RwLock<LifecycleState>>,
    skip_waiting: AtomicBool,
    pending: Mutex<JoinSet<()>>,
}

impl OfflineProxy {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        let names = config.generation_names();
        info!(
            "Creating offline proxy {} for {} ({} manifest entries)",
            config.version,
            config.origin,
            config.manifest.len()
        );
        Self {
            config,
            names,
            storage,
            fetcher,
            notifier,
            clients,
            state: Arc::new(RwLock::new(LifecycleState::Parsed)),
            skip_waiting: AtomicBool::new(false),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn names(&self) -> &GenerationNames {
        &self.names
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// 安装成功后是否跳过等待阶段、立即激活
    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    async fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut state = self.state.write().await;
        *state = state.transition(next)?;
        debug!("Proxy {} is now {}", self.config.version, next);
        Ok(())
    }

    /// 标记为已废弃（安装失败或被新版本取代）
    pub async fn retire(&self) {
        *self.state.write().await = LifecycleState::Redundant;
        info!("Proxy {} is redundant", self.config.version);
    }

    #[tracing::instrument(skip(self), fields(version = %self.config.version))]
    pub async fn install(&self) -> Result<()> {
        self.transition(LifecycleState::Installing).await?;

        match self.precache().await {
            Ok(count) => {
                info!("Cached {} static assets in {}", count, self.names.static_name);
                self.skip_waiting.store(true, Ordering::SeqCst);
                self.transition(LifecycleState::Installed).await
            }
            Err(e) => {
                error!("Install failed: {}", e);
                self.retire().await;
                Err(e)
            }
        }
    }

    /// 先抓取全部清单资源，全部成功后才一次性写入静态代
    async fn precache(&self) -> Result<usize> {
        let fetches = self.config.manifest.entries().iter().map(|url| async move {
            let request = ResourceRequest::new(hyper::Method::GET, url.clone(), RequestMode::SameOrigin);
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| ProxyError::Install(format!("{}: {}", url, e)))?;
            if !response.is_ok() {
                return Err(ProxyError::Install(format!("{} returned {}", url, response.status)));
            }
            Ok::<_, ProxyError>((request.key(), response.stamped(Utc::now())))
        });

        let entries = future::try_join_all(fetches).await?;
        let count = entries.len();

        self.storage.open(&self.names.static_name).await?;
        self.storage.put_all(&self.names.static_name, entries).await?;
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(version = %self.config.version))]
    pub async fn activate(&self) -> Result<ActivationReport> {
        self.transition(LifecycleState::Activating).await?;

        let mut report = ActivationReport::default();
        match self.storage.keys().await {
            Ok(names) => {
                let stale: Vec<String> = names
                    .into_iter()
                    .filter(|name| !self.names.is_whitelisted(name))
                    .collect();

                // 每个旧代独立删除，单个失败不影响其他
                let deletions = stale.iter().map(|name| self.storage.delete(name));
                for (name, result) in stale.iter().zip(future::join_all(deletions).await) {
                    match result {
                        Ok(_) => {
                            info!("Purged stale generation {}", name);
                            report.purged.push(name.clone());
                        }
                        Err(e) => {
                            warn!("Failed to purge generation {}: {}", name, e);
                            report.failed.push(name.clone());
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to enumerate generations: {}", e),
        }

        report.claimed = self.clients.claim(&self.config.version).await;
        self.transition(LifecycleState::Active).await?;
        info!(
            "Activated {}: purged {:?}, claimed {} clients",
            self.config.version, report.purged, report.claimed
        );
        Ok(report)
    }

    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn handle_fetch(&self, request: &ResourceRequest) -> Result<FetchDisposition> {
        if self.state().await != LifecycleState::Active {
            return Ok(FetchDisposition::PassThrough);
        }
        // 跳过跨域请求
        if !utils::same_origin(&request.url, &self.config.origin) {
            debug!("Cross-origin request, not intercepted");
            return Ok(FetchDisposition::PassThrough);
        }
        // 跳过非 GET 请求
        if !request.is_retrieval() {
            debug!("Non-GET request, not intercepted");
            return Ok(FetchDisposition::PassThrough);
        }

        let key = request.key();
        if let Some(snapshot) = self.lookup(&key).await {
            return Ok(FetchDisposition::Respond(snapshot));
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if request.carries_credentials() {
                    debug!("Not caching credentialed request");
                } else if response.is_cacheable() {
                    self.cache_dynamic(key, response.clone()).await;
                } else {
                    debug!(
                        "Not caching response: status {}, type {:?}",
                        response.status, response.response_type
                    );
                }
                Ok(FetchDisposition::Respond(response))
            }
            Err(e) if e.is_network() && request.is_navigation() => {
                warn!("Navigation failed offline, serving fallback: {}", e);
                Ok(FetchDisposition::Respond(self.offline_fallback().await))
            }
            Err(e) => Err(e),
        }
    }

    /// 按 静态 → 动态 的顺序查找；动态代中过期的条目视为未命中并删除
    async fn lookup(&self, key: &CacheKey) -> Option<ResponseSnapshot> {
        let hit = match self.storage.match_any(&self.names.priority(), key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                return None;
            }
        };

        let (name, snapshot) = hit?;
        if name == self.names.dynamic_name
            && self.config.eviction.is_expired(snapshot.stored_at, Utc::now())
        {
            debug!("Dynamic entry expired: {}", key);
            if let Err(e) = self.storage.delete_entry(&name, key).await {
                warn!("Failed to delete expired entry {}: {}", key, e);
            }
            return None;
        }

        debug!("Cache hit in {} for {}", name, key);
        Some(snapshot)
    }

    /// 后台写入动态代；失败只记录日志，不影响返回给调用方的响应。
    /// 写入期间持有状态读锁，代理不再处于 Active 时放弃写入，避免重建已被清除的代。
    async fn cache_dynamic(&self, key: CacheKey, response: ResponseSnapshot) {
        let state = self.state.clone();
        let storage = self.storage.clone();
        let name = self.names.dynamic_name.clone();
        let max_entries = self.config.eviction.max_entries;
        let snapshot = response.stamped(Utc::now());

        let mut pending = self.pending.lock().await;
        // 回收已完成的任务
        while pending.try_join_next().is_some() {}

        pending.spawn(async move {
            let state = state.read().await;
            if *state != LifecycleState::Active {
                debug!("Proxy is {}, dropping cache write for {}", *state, key);
                return;
            }

            if let Err(e) = storage.put(&name, key.clone(), snapshot).await {
                warn!("Failed to cache {} in {}: {}", key, name, e);
                return;
            }
            debug!("Cached {} in {}", key, name);

            if let Some(max_entries) = max_entries {
                match storage.trim(&name, max_entries).await {
                    Ok(0) => {}
                    Ok(evicted) => debug!("Evicted {} entries from {}", evicted, name),
                    Err(e) => warn!("Failed to trim {}: {}", name, e),
                }
            }
        });
    }

    async fn offline_fallback(&self) -> ResponseSnapshot {
        let page = self.config.manifest.offline_page();
        let key = CacheKey::new(&hyper::Method::GET, page);
        match self.storage.match_any(&self.names.priority(), &key).await {
            Ok(Some((_, snapshot))) => snapshot,
            Ok(None) => {
                warn!("Offline page {} is not cached, returning 503", page);
                ResponseSnapshot::synthetic_offline()
            }
            Err(e) => {
                warn!("Failed to read offline page {}: {}", page, e);
                ResponseSnapshot::synthetic_offline()
            }
        }
    }

    /// 推送事件转通知；通知失败只记录，不重试
    #[tracing::instrument(skip(self, event))]
    pub async fn handle_push(&self, event: &PushEvent) -> NotificationOptions {
        let template = &self.config.notification;
        let options = NotificationOptions {
            body: event.text(),
            icon: template.icon.clone(),
            badge: template.badge.clone(),
            vibrate: template.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: Utc::now().timestamp_millis(),
                primary_key: uuid::Uuid::new_v4().to_string(),
            },
        };

        if let Err(e) = self
            .notifier
            .show_notification(&template.title, options.clone())
            .await
        {
            warn!("Failed to show notification: {}", e);
        }
        options
    }

    /// 等待所有后台缓存写入完成。等待时不持有锁，期间新加入的任务在下一轮等待。
    pub async fn wait_until_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.pending.lock().await);
            if tasks.is_empty() {
                break;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Background cache task failed: {}", e);
                }
            }
        }
    }
}
