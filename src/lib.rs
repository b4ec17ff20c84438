pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod host;
pub mod logger;
pub mod network;
pub mod notification;
pub mod proxy;
pub mod request;
pub mod url_mapper;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use host::{HostStatus, ProxyHost};
pub use proxy::ProxyServer;
pub use worker::OfflineProxy;

pub mod prelude {
    pub use crate::cache::{CacheStorage, DiskStorage, EvictionPolicy, ExpirySweeper, MemoryStorage};
    pub use crate::clients::{ClientId, ClientRegistry};
    pub use crate::config::{Config, StorageBackend};
    pub use crate::host::ProxyHost;
    pub use crate::network::{Fetcher, HttpFetcher};
    pub use crate::notification::{NotificationCenter, Notifier, PushEvent};
    pub use crate::proxy::ProxyServer;
    pub use crate::request::{RequestMode, ResourceRequest, ResponseSnapshot};
    pub use crate::worker::{FetchDisposition, LifecycleState, OfflineProxy, WorkerConfig};
}
