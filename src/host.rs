use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::cache::{CacheStorage, GenerationStats};
use crate::clients::{ClientId, ClientRegistry};
use crate::error::Result;
use crate::network::Fetcher;
use crate::notification::{Notifier, PushEvent};
use crate::request::{ResourceRequest, ResponseSnapshot};
use crate::worker::{FetchDisposition, LifecycleState, OfflineProxy, WorkerConfig};

/// 宿主运行时：驱动代理的生命周期并分发请求与推送事件
pub struct ProxyHost {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    clients: Arc<ClientRegistry>,
    active: RwLock<Option<Arc<OfflineProxy>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub version: Option<String>,
    pub state: Option<LifecycleState>,
    pub clients: usize,
    pub generations: Vec<GenerationStats>,
}

impl ProxyHost {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            notifier,
            clients,
            active: RwLock::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub async fn active(&self) -> Option<Arc<OfflineProxy>> {
        self.active.read().await.clone()
    }

    /// 安装并激活新版本。安装失败时保留原来的激活版本。
    pub async fn register(&self, config: WorkerConfig) -> Result<Arc<OfflineProxy>> {
        let proxy = Arc::new(OfflineProxy::new(
            config,
            self.storage.clone(),
            self.fetcher.clone(),
            self.notifier.clone(),
            self.clients.clone(),
        ));

        if let Err(e) = proxy.install().await {
            error!("Keeping previous proxy, install of {} failed: {}", proxy.version(), e);
            return Err(e);
        }

        if proxy.skip_waiting() {
            // 先让旧版本停止写入并排空后台任务，再清除旧代
            let previous = self.active.read().await.clone();
            if let Some(previous) = &previous {
                previous.retire().await;
                previous.wait_until_idle().await;
            }

            proxy.activate().await?;
            *self.active.write().await = Some(proxy.clone());
            info!("Proxy {} is now in control", proxy.version());
        }

        Ok(proxy)
    }

    /// 分发一次请求。代理未拦截时宿主直接访问网络。
    pub async fn dispatch_fetch(
        &self,
        client: &ClientId,
        request: &ResourceRequest,
    ) -> Result<ResponseSnapshot> {
        let proxy = self.active().await;

        if let Some(proxy) = &proxy {
            if request.is_navigation() {
                self.clients.register_controlled(client.clone(), proxy.version()).await;
            } else {
                self.clients.register(client.clone()).await;
            }

            if self.clients.is_controlled_by(client, proxy.version()).await {
                if let FetchDisposition::Respond(snapshot) = proxy.handle_fetch(request).await? {
                    return Ok(snapshot);
                }
            } else {
                debug!("Client {} is not controlled, bypassing proxy", client);
            }
        }

        self.fetcher.fetch(request).await
    }

    pub async fn dispatch_push(&self, event: PushEvent) -> Result<()> {
        match self.active().await {
            Some(proxy) => {
                proxy.handle_push(&event).await;
            }
            None => debug!("No active proxy, dropping push event"),
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<HostStatus> {
        let proxy = self.active().await;
        let state = match &proxy {
            Some(proxy) => Some(proxy.state().await),
            None => None,
        };
        Ok(HostStatus {
            version: proxy.as_ref().map(|p| p.version().to_string()),
            state,
            clients: self.clients.len().await,
            generations: self.storage.stats().await?,
        })
    }

    /// 关闭前等待激活版本的后台任务完成
    pub async fn shutdown(&self) {
        if let Some(proxy) = self.active().await {
            info!("Waiting for pending cache writes of {}", proxy.version());
            proxy.wait_until_idle().await;
        }
    }
}
