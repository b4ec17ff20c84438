//! 缓存代（generation）存储。
//!
//! 每个代是一个命名的 key → 响应快照映射，例如 `static-v1`、`dynamic-v1`。
//! 单个 key 的 put/match/delete 由后端保证原子性，调用方不再额外加锁。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::request::{CacheKey, ResponseSnapshot};

mod cleaner;
mod disk;
mod entry;
mod memory;
mod metadata;
mod policy;

pub use cleaner::ExpirySweeper;
pub use disk::DiskStorage;
pub use memory::MemoryStorage;
pub use metadata::EntryMetadata;
pub use policy::EvictionPolicy;

#[async_trait]
pub trait CacheStorage: Send + Sync + std::fmt::Debug {
    /// 打开（不存在则创建）一个代
    async fn open(&self, name: &str) -> Result<()>;

    /// 所有代的名称，按名称排序
    async fn keys(&self) -> Result<Vec<String>>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// 删除整个代，返回是否存在过
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<ResponseSnapshot>>;

    /// 按 `order` 给定的优先级依次查找，第一个命中的代胜出
    async fn match_any(
        &self,
        order: &[String],
        key: &CacheKey,
    ) -> Result<Option<(String, ResponseSnapshot)>> {
        for name in order {
            if let Some(snapshot) = self.match_in(name, key).await? {
                return Ok(Some((name.clone(), snapshot)));
            }
        }
        Ok(None)
    }

    /// 写入单个条目；代不存在时自动创建
    async fn put(&self, name: &str, key: CacheKey, snapshot: ResponseSnapshot) -> Result<()>;

    /// 批量写入，要么全部可见，要么全部不可见
    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, ResponseSnapshot)>) -> Result<()>;

    async fn delete_entry(&self, name: &str, key: &CacheKey) -> Result<bool>;

    async fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>>;

    /// 按最近最少使用淘汰，直到条目数不超过 `max_entries`，返回淘汰数量
    async fn trim(&self, name: &str, max_entries: usize) -> Result<usize>;

    /// 删除存储时间早于 `cutoff` 的条目，返回删除数量
    async fn remove_older_than(&self, name: &str, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn stats(&self) -> Result<Vec<GenerationStats>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationStats {
    pub name: String,
    pub entries: usize,
    pub used_space: u64,
}
