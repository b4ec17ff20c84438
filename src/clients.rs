use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 一个打开的客户端上下文（服务器侧以对端地址标识）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 默认最多记录的客户端数量
pub const DEFAULT_MAX_CLIENTS: usize = 1024;

#[derive(Debug)]
struct ClientState {
    controller: Option<String>,
    last_seen: u64,
}

#[derive(Debug, Default)]
struct Clients {
    entries: HashMap<ClientId, ClientState>,
    clock: u64,
}

impl Clients {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// 超出容量时淘汰最久未出现的客户端
    fn make_room(&mut self, capacity: usize) {
        while self.entries.len() >= capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, state)| state.last_seen)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!("Forgetting idle client {}", id);
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

/// 记录每个客户端由哪个版本的代理控制，数量有上限
#[derive(Debug)]
pub struct ClientRegistry {
    clients: RwLock<Clients>,
    capacity: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_CLIENTS)
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(Clients::default()),
            capacity: capacity.max(1),
        }
    }

    /// 登记客户端；新客户端暂不受控，已知客户端只刷新活跃时间
    pub async fn register(&self, id: ClientId) {
        let mut clients = self.clients.write().await;
        let tick = clients.tick();
        if let Some(state) = clients.entries.get_mut(&id) {
            state.last_seen = tick;
            return;
        }
        clients.make_room(self.capacity);
        debug!("Registered client {}", id);
        clients.entries.insert(
            id,
            ClientState {
                controller: None,
                last_seen: tick,
            },
        );
    }

    /// 导航请求创建的客户端直接由当前激活版本控制
    pub async fn register_controlled(&self, id: ClientId, version: &str) {
        let mut clients = self.clients.write().await;
        let tick = clients.tick();
        if !clients.entries.contains_key(&id) {
            clients.make_room(self.capacity);
        }
        clients.entries.insert(
            id,
            ClientState {
                controller: Some(version.to_string()),
                last_seen: tick,
            },
        );
    }

    /// 让所有已打开的客户端立即由 `version` 控制，返回被接管的数量
    pub async fn claim(&self, version: &str) -> usize {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for state in clients.entries.values_mut() {
            if state.controller.as_deref() != Some(version) {
                state.controller = Some(version.to_string());
                claimed += 1;
            }
        }
        info!("Claimed {} of {} clients for {}", claimed, clients.entries.len(), version);
        claimed
    }

    pub async fn controller_of(&self, id: &ClientId) -> Option<String> {
        self.clients
            .read()
            .await
            .entries
            .get(id)
            .and_then(|state| state.controller.clone())
    }

    pub async fn is_controlled_by(&self, id: &ClientId, version: &str) -> bool {
        self.controller_of(id).await.as_deref() == Some(version)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::test;

    #[test]
    async fn test_claim_takes_over_all_clients() {
        let registry = ClientRegistry::new();
        registry.register(ClientId::new("10.0.0.1")).await;
        registry.register_controlled(ClientId::new("10.0.0.2"), "v1").await;

        assert!(!registry.is_controlled_by(&ClientId::new("10.0.0.1"), "v1").await);
        assert_eq!(registry.claim("v1").await, 1);
        assert!(registry.is_controlled_by(&ClientId::new("10.0.0.1"), "v1").await);

        assert_eq!(registry.claim("v2").await, 2);
        assert_eq!(registry.controller_of(&ClientId::new("10.0.0.2")).await.as_deref(), Some("v2"));
        assert_eq!(registry.len().await, 2);
    }

    #[test]
    async fn test_register_keeps_existing_controller() {
        let registry = ClientRegistry::new();
        registry.register_controlled(ClientId::new("a"), "v1").await;
        registry.register(ClientId::new("a")).await;
        assert!(registry.is_controlled_by(&ClientId::new("a"), "v1").await);
    }

    #[test]
    async fn test_registry_forgets_least_recently_seen() {
        let registry = ClientRegistry::with_capacity(2);
        registry.register(ClientId::new("a")).await;
        registry.register_controlled(ClientId::new("b"), "v1").await;
        // a 再次出现，b 成为最久未出现的客户端
        registry.register(ClientId::new("a")).await;
        registry.register(ClientId::new("c")).await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.controller_of(&ClientId::new("b")).await, None);
        registry.register_controlled(ClientId::new("a"), "v1").await;
        assert_eq!(registry.len().await, 2);
        assert!(registry.is_controlled_by(&ClientId::new("a"), "v1").await);
    }
}
