use std::sync::Arc;

use offline_cache_proxy::logger::init_logger;
use offline_cache_proxy::prelude::*;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    init_logger();

    info!("Starting offline cache proxy");

    // 初始化配置
    let config = Config::load()?;

    let storage = create_storage(&config).await?;
    let notifications = Arc::new(NotificationCenter::new(config.notification.history));
    let fetcher = Arc::new(HttpFetcher::new(config.origin()?, config.upstream()?));
    let host = Arc::new(ProxyHost::new(
        storage.clone(),
        fetcher,
        notifications.clone(),
        Arc::new(ClientRegistry::with_capacity(config.server.max_clients)),
    ));

    // 安装失败时不拦截任何请求，直接转发到上游
    let worker_config = config.worker_config()?;
    let dynamic_name = worker_config.generation_names().dynamic_name;
    if let Err(e) = host.register(worker_config).await {
        error!("Failed to install offline proxy: {}", e);
    }

    // 启动过期清理
    let policy = config.eviction_policy();
    if policy.max_age.is_some() {
        ExpirySweeper::new(storage, dynamic_name, policy, config.sweep_interval()).start();
    }

    let server = ProxyServer::new(config.listen_addr()?, config.origin()?, host.clone(), notifications);
    if let Err(e) = server.run(wait_for_shutdown()).await {
        error!("Server stopped with error: {}", e);
    }

    // 优雅关闭
    info!("Shutting down...");
    host.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn create_storage(config: &Config) -> Result<Arc<dyn CacheStorage>, Box<dyn std::error::Error>> {
    let storage: Arc<dyn CacheStorage> = match config.worker.storage {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Disk => Arc::new(DiskStorage::load(&config.worker.cache_dir).await?),
    };
    Ok(storage)
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
