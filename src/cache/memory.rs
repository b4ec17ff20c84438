use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::entry::CacheEntry;
use super::{CacheStorage, GenerationStats};
use crate::error::Result;
use crate::request::{CacheKey, ResponseSnapshot};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    generations: BTreeMap<String, HashMap<CacheKey, CacheEntry>>,
    clock: u64,
}

impl MemoryState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.generations.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.generations.keys().cloned().collect())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.state.read().await.generations.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed = self.state.write().await.generations.remove(name).is_some();
        debug!("Deleted generation {}: {}", name, removed);
        Ok(removed)
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<ResponseSnapshot>> {
        let mut state = self.state.write().await;
        let tick = state.tick();
        let entry = state
            .generations
            .get_mut(name)
            .and_then(|entries| entries.get_mut(key));

        Ok(entry.map(|entry| {
            entry.touch(tick);
            entry.snapshot.clone()
        }))
    }

    async fn put(&self, name: &str, key: CacheKey, snapshot: ResponseSnapshot) -> Result<()> {
        let mut state = self.state.write().await;
        let tick = state.tick();
        state
            .generations
            .entry(name.to_string())
            .or_default()
            .insert(key, CacheEntry::new(snapshot, tick));
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, ResponseSnapshot)>) -> Result<()> {
        // 持有写锁期间一次性插入，其他读者看不到中间状态
        let mut state = self.state.write().await;
        let tick = state.tick();
        let generation = state.generations.entry(name.to_string()).or_default();
        for (key, snapshot) in entries {
            generation.insert(key, CacheEntry::new(snapshot, tick));
        }
        Ok(())
    }

    async fn delete_entry(&self, name: &str, key: &CacheKey) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .generations
            .get_mut(name)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>> {
        let state = self.state.read().await;
        let mut keys: Vec<CacheKey> = state
            .generations
            .get(name)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn trim(&self, name: &str, max_entries: usize) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(entries) = state.generations.get_mut(name) else {
            return Ok(0);
        };
        if entries.len() <= max_entries {
            return Ok(0);
        }

        let mut by_access: Vec<(u64, CacheKey)> = entries
            .iter()
            .map(|(key, entry)| (entry.last_access, key.clone()))
            .collect();
        by_access.sort();

        let excess = entries.len() - max_entries;
        for (_, key) in by_access.into_iter().take(excess) {
            debug!("Evicting {} from {}", key, name);
            entries.remove(&key);
        }
        Ok(excess)
    }

    async fn remove_older_than(&self, name: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(entries) = state.generations.get_mut(name) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|_, entry| entry.snapshot.stored_at.map_or(true, |at| at >= cutoff));
        Ok(before - entries.len())
    }

    async fn stats(&self) -> Result<Vec<GenerationStats>> {
        let state = self.state.read().await;
        Ok(state
            .generations
            .iter()
            .map(|(name, entries)| GenerationStats {
                name: name.clone(),
                entries: entries.len(),
                used_space: entries.values().map(|e| e.size).sum(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;
    use tokio::test;
    use url::Url;

    fn key(path: &str) -> CacheKey {
        CacheKey::new(&Method::GET, &Url::parse("http://app.test/").unwrap().join(path).unwrap())
    }

    #[test]
    async fn test_put_and_match() {
        let storage = MemoryStorage::new();
        let snapshot = ResponseSnapshot::new(200, "hello").with_header("content-type", "text/plain");
        storage.put("dynamic-v1", key("/a"), snapshot.clone()).await.unwrap();

        assert_eq!(storage.match_in("dynamic-v1", &key("/a")).await.unwrap(), Some(snapshot));
        assert_eq!(storage.match_in("dynamic-v1", &key("/b")).await.unwrap(), None);
        assert_eq!(storage.match_in("static-v1", &key("/a")).await.unwrap(), None);
    }

    #[test]
    async fn test_match_any_respects_order() {
        let storage = MemoryStorage::new();
        storage.put("static-v1", key("/"), ResponseSnapshot::new(200, "static")).await.unwrap();
        storage.put("dynamic-v1", key("/"), ResponseSnapshot::new(200, "dynamic")).await.unwrap();

        let order = vec!["static-v1".to_string(), "dynamic-v1".to_string()];
        let (name, hit) = storage.match_any(&order, &key("/")).await.unwrap().unwrap();
        assert_eq!(name, "static-v1");
        assert_eq!(hit.body, "static");

        let reversed = vec!["dynamic-v1".to_string(), "static-v1".to_string()];
        let (name, _) = storage.match_any(&reversed, &key("/")).await.unwrap().unwrap();
        assert_eq!(name, "dynamic-v1");
    }

    #[test]
    async fn test_keys_and_delete() {
        let storage = MemoryStorage::new();
        storage.open("static-v1").await.unwrap();
        storage.open("dynamic-v1").await.unwrap();
        storage.open("job-portal-v1").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["dynamic-v1", "job-portal-v1", "static-v1"]);
        assert!(storage.delete("job-portal-v1").await.unwrap());
        assert!(!storage.delete("job-portal-v1").await.unwrap());
        assert!(!storage.has("job-portal-v1").await.unwrap());
    }

    #[test]
    async fn test_trim_evicts_least_recently_used() {
        let storage = MemoryStorage::new();
        for path in ["/a", "/b", "/c"] {
            storage.put("dynamic-v1", key(path), ResponseSnapshot::new(200, path)).await.unwrap();
        }
        // 访问 /a，使 /b 成为最久未使用
        storage.match_in("dynamic-v1", &key("/a")).await.unwrap();

        assert_eq!(storage.trim("dynamic-v1", 2).await.unwrap(), 1);
        assert_eq!(storage.entry_keys("dynamic-v1").await.unwrap(), vec![key("/a"), key("/c")]);
        assert_eq!(storage.trim("dynamic-v1", 2).await.unwrap(), 0);
    }

    #[test]
    async fn test_remove_older_than() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let old = ResponseSnapshot::new(200, "old").stamped(now - chrono::Duration::hours(1));
        let fresh = ResponseSnapshot::new(200, "fresh").stamped(now);
        storage.put("dynamic-v1", key("/old"), old).await.unwrap();
        storage.put("dynamic-v1", key("/fresh"), fresh).await.unwrap();

        let removed = storage
            .remove_older_than("dynamic-v1", now - chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.entry_keys("dynamic-v1").await.unwrap(), vec![key("/fresh")]);
    }

    #[test]
    async fn test_stats() {
        let storage = MemoryStorage::new();
        storage.put("dynamic-v1", key("/a"), ResponseSnapshot::new(200, "12345")).await.unwrap();
        storage.open("static-v1").await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0], GenerationStats { name: "dynamic-v1".into(), entries: 1, used_space: 5 });
        assert_eq!(stats[1].entries, 0);
    }
}
