use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::metadata::EntryMetadata;
use super::{CacheStorage, GenerationStats};
use crate::error::{ProxyError, Result};
use crate::request::{CacheKey, ResponseSnapshot};

const STAGING_PREFIX: &str = ".staging-";
const BODY_EXT: &str = "body";
const META_EXT: &str = "meta.json";

/// 基于文件系统的代存储：每个代一个目录，每个条目一个 body 文件加一个 JSON 元数据文件
#[derive(Debug)]
pub struct DiskStorage {
    root_path: PathBuf,
    state: RwLock<DiskState>,
}

#[derive(Debug, Default)]
struct DiskState {
    generations: BTreeMap<String, HashMap<CacheKey, IndexEntry>>,
    clock: u64,
}

impl DiskState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    stem: String,
    size: u64,
    stored_at: DateTime<Utc>,
    last_access: u64,
}

impl DiskStorage {
    /// 打开根目录并扫描已有的代，重建内存索引
    pub async fn load<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        info!("Loading disk cache storage from {:?}", root_path);
        fs::create_dir_all(&root_path).await?;

        let mut state = DiskState::default();
        let mut dirs = fs::read_dir(&root_path).await?;
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let name = dir.file_name().to_string_lossy().to_string();

            // 上次中断的批量写入
            if name.starts_with(STAGING_PREFIX) {
                warn!("Removing abandoned staging directory {}", name);
                fs::remove_dir_all(dir.path()).await?;
                continue;
            }

            let entries = Self::scan_generation(&dir.path(), &mut state).await?;
            debug!("Loaded generation {} with {} entries", name, entries.len());
            state.generations.insert(name, entries);
        }

        Ok(Self {
            root_path,
            state: RwLock::new(state),
        })
    }

    async fn scan_generation(
        dir: &Path,
        state: &mut DiskState,
    ) -> Result<HashMap<CacheKey, IndexEntry>> {
        let mut entries = HashMap::new();
        let mut files = fs::read_dir(dir).await?;
        while let Some(file) = files.next_entry().await? {
            let file_name = file.file_name().to_string_lossy().to_string();
            let Some(stem) = file_name.strip_suffix(&format!(".{}", META_EXT)) else {
                continue;
            };

            let raw = fs::read(file.path()).await?;
            match serde_json::from_slice::<EntryMetadata>(&raw) {
                Ok(meta) => {
                    let tick = state.tick();
                    entries.insert(
                        meta.key.clone(),
                        IndexEntry {
                            stem: stem.to_string(),
                            size: meta.size,
                            stored_at: meta.stored_at,
                            last_access: tick,
                        },
                    );
                }
                Err(e) => warn!("Skipping unreadable metadata {:?}: {}", file.path(), e),
            }
        }
        Ok(entries)
    }

    fn validate_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(ProxyError::InvalidInput(format!("invalid generation name: {:?}", name)))
        }
    }

    fn generation_path(&self, name: &str) -> PathBuf {
        self.root_path.join(name)
    }

    fn entry_stem(key: &CacheKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn body_path(dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{}.{}", stem, BODY_EXT))
    }

    fn meta_path(dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{}.{}", stem, META_EXT))
    }

    /// 先写临时文件再 rename，读者不会看到半个文件
    async fn write_entry(dir: &Path, stem: &str, meta: &EntryMetadata, body: &Bytes) -> Result<()> {
        let body_path = Self::body_path(dir, stem);
        let body_tmp = body_path.with_extension("body.tmp");
        fs::write(&body_tmp, body).await?;
        fs::rename(&body_tmp, &body_path).await?;

        let meta_path = Self::meta_path(dir, stem);
        let meta_tmp = dir.join(format!("{}.meta.tmp", stem));
        fs::write(&meta_tmp, serde_json::to_vec(meta)?).await?;
        fs::rename(&meta_tmp, &meta_path).await?;
        Ok(())
    }

    async fn remove_entry_files(dir: &Path, stem: &str) {
        for path in [Self::meta_path(dir, stem), Self::body_path(dir, stem)] {
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove cache file {:?}: {}", path, e);
            }
        }
    }

    /// 把暂存目录中的条目逐个移入已有的代。先移 body 再移元数据；
    /// 某个条目移动失败时从索引与磁盘中去掉它，已移动的条目保持可见。
    async fn merge_staged<F>(
        staging: &Path,
        target: &Path,
        metas: &[(CacheKey, EntryMetadata)],
        mut update: F,
        tick: u64,
    ) -> Result<()>
    where
        F: FnMut(&CacheKey, Option<IndexEntry>),
    {
        for (key, meta) in metas {
            let stem = Self::entry_stem(key);
            let moved = async {
                fs::rename(Self::body_path(staging, &stem), Self::body_path(target, &stem)).await?;
                fs::rename(Self::meta_path(staging, &stem), Self::meta_path(target, &stem)).await?;
                Ok::<_, ProxyError>(())
            }
            .await;

            match moved {
                Ok(()) => update(key, Some(Self::index_entry(key, meta, tick))),
                Err(e) => {
                    warn!("Failed to move {} into place: {}", key, e);
                    update(key, None);
                    Self::remove_entry_files(target, &stem).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn index_entry(key: &CacheKey, meta: &EntryMetadata, tick: u64) -> IndexEntry {
        IndexEntry {
            stem: Self::entry_stem(key),
            size: meta.size,
            stored_at: meta.stored_at,
            last_access: tick,
        }
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;
        let mut state = self.state.write().await;
        if !state.generations.contains_key(name) {
            fs::create_dir_all(self.generation_path(name)).await?;
            state.generations.insert(name.to_string(), HashMap::new());
            debug!("Created generation {}", name);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.generations.keys().cloned().collect())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.state.read().await.generations.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.generations.remove(name).is_none() {
            return Ok(false);
        }
        let path = self.generation_path(name);
        if path.exists() {
            fs::remove_dir_all(&path).await?;
        }
        info!("Deleted generation {}", name);
        Ok(true)
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<ResponseSnapshot>> {
        let stem = {
            let mut state = self.state.write().await;
            let tick = state.tick();
            match state.generations.get_mut(name).and_then(|e| e.get_mut(key)) {
                Some(entry) => {
                    entry.last_access = tick;
                    entry.stem.clone()
                }
                None => return Ok(None),
            }
        };

        let dir = self.generation_path(name);
        let meta: EntryMetadata = serde_json::from_slice(&fs::read(Self::meta_path(&dir, &stem)).await?)?;
        let body = fs::read(Self::body_path(&dir, &stem)).await?;
        Ok(Some(meta.into_snapshot(Bytes::from(body))))
    }

    async fn put(&self, name: &str, key: CacheKey, snapshot: ResponseSnapshot) -> Result<()> {
        self.open(name).await?;
        let meta = EntryMetadata::from_snapshot(key.clone(), &snapshot);
        let stem = Self::entry_stem(&key);

        let mut state = self.state.write().await;
        Self::write_entry(&self.generation_path(name), &stem, &meta, &snapshot.body).await?;
        let tick = state.tick();
        let entry = Self::index_entry(&key, &meta, tick);
        state
            .generations
            .entry(name.to_string())
            .or_default()
            .insert(key, entry);
        debug!("Stored {} bytes for {} in {}", meta.size, meta.key, name);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, ResponseSnapshot)>) -> Result<()> {
        Self::validate_name(name)?;
        let mut state = self.state.write().await;

        // 全部写入暂存目录，成功后再移动到位
        let staging = self
            .root_path
            .join(format!("{}{}-{}", STAGING_PREFIX, name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&staging).await?;

        let mut metas = Vec::with_capacity(entries.len());
        for (key, snapshot) in &entries {
            let meta = EntryMetadata::from_snapshot(key.clone(), snapshot);
            let stem = Self::entry_stem(key);
            if let Err(e) = Self::write_entry(&staging, &stem, &meta, &snapshot.body).await {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e);
            }
            metas.push((key.clone(), meta));
        }

        let target = self.generation_path(name);
        let tick = state.tick();
        if state.generations.contains_key(name) {
            // 代已存在，只能逐个条目移动；每移动一个就更新索引
            let generation = state.generations.entry(name.to_string()).or_default();
            let update = |key: &CacheKey, entry: Option<IndexEntry>| {
                match entry {
                    Some(entry) => generation.insert(key.clone(), entry),
                    None => generation.remove(key),
                };
            };
            let result = Self::merge_staged(&staging, &target, &metas, update, tick).await;
            if let Err(e) = fs::remove_dir_all(&staging).await {
                warn!("Failed to remove staging directory {:?}: {}", staging, e);
            }
            result?;
        } else {
            fs::rename(&staging, &target).await?;
            let generation = state.generations.entry(name.to_string()).or_default();
            for (key, meta) in &metas {
                generation.insert(key.clone(), Self::index_entry(key, meta, tick));
            }
        }

        info!("Stored batch of {} entries in {}", metas.len(), name);
        Ok(())
    }

    async fn delete_entry(&self, name: &str, key: &CacheKey) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.generations.get_mut(name).and_then(|e| e.remove(key));
        match removed {
            Some(entry) => {
                Self::remove_entry_files(&self.generation_path(name), &entry.stem).await;
                Ok(true)
            }
            None => Ok(false),
        }
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
        let dir = self.generation_path(name);
        for (_, key) in by_access.into_iter().take(excess) {
            if let Some(entry) = entries.remove(&key) {
                debug!("Evicting {} from {}", key, name);
                Self::remove_entry_files(&dir, &entry.stem).await;
            }
        }
        Ok(excess)
    }

    async fn remove_older_than(&self, name: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(entries) = state.generations.get_mut(name) else {
            return Ok(0);
        };

        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.stored_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        let dir = self.generation_path(name);
        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                Self::remove_entry_files(&dir, &entry.stem).await;
            }
        }
        Ok(expired.len())
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
    use url::Url;

    fn key(path: &str) -> CacheKey {
        CacheKey::new(&Method::GET, &Url::parse("http://app.test/").unwrap().join(path).unwrap())
    }

    fn snapshot(body: &'static str) -> ResponseSnapshot {
        ResponseSnapshot::new(200, body)
            .with_header("content-type", "text/html")
            .stamped(Utc::now())
    }

    #[tokio::test]
    async fn test_put_and_match_roundtrip_through_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::load(temp_dir.path()).await.unwrap();

        let stored = snapshot("<html>offline</html>");
        storage.put("static-v1", key("/offline.html"), stored.clone()).await.unwrap();

        let hit = storage.match_in("static-v1", &key("/offline.html")).await.unwrap().unwrap();
        assert_eq!(hit, stored);
        assert_eq!(hit.header("content-type"), Some("text/html"));
    }

    #[tokio::test]
    async fn test_reload_rebuilds_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let storage = DiskStorage::load(temp_dir.path()).await.unwrap();
            storage
                .put_all("static-v1", vec![(key("/"), snapshot("root")), (key("/index.html"), snapshot("index"))])
                .await
                .unwrap();
            storage.put("dynamic-v1", key("/jobs"), snapshot("jobs")).await.unwrap();
        }

        let storage = DiskStorage::load(temp_dir.path()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["dynamic-v1", "static-v1"]);
        assert_eq!(storage.entry_keys("static-v1").await.unwrap().len(), 2);
        let hit = storage.match_in("dynamic-v1", &key("/jobs")).await.unwrap().unwrap();
        assert_eq!(hit.body, "jobs");
    }

    #[tokio::test]
    async fn test_abandoned_staging_is_discarded() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".staging-static-v2-abc")).unwrap();

        let storage = DiskStorage::load(temp_dir.path()).await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(!temp_dir.path().join(".staging-static-v2-abc").exists());
    }

    #[tokio::test]
    async fn test_delete_generation_removes_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::load(temp_dir.path()).await.unwrap();
        storage.put("job-portal-v1", key("/"), snapshot("old")).await.unwrap();
        assert!(temp_dir.path().join("job-portal-v1").exists());

        assert!(storage.delete("job-portal-v1").await.unwrap());
        assert!(!temp_dir.path().join("job-portal-v1").exists());
        assert!(storage.match_in("job-portal-v1", &key("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trim_and_delete_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::load(temp_dir.path()).await.unwrap();
        for path in ["/a", "/b", "/c"] {
            storage.put("dynamic-v1", key(path), snapshot("x")).await.unwrap();
        }
        storage.match_in("dynamic-v1", &key("/a")).await.unwrap();

        assert_eq!(storage.trim("dynamic-v1", 2).await.unwrap(), 1);
        assert_eq!(storage.entry_keys("dynamic-v1").await.unwrap(), vec![key("/a"), key("/c")]);

        assert!(storage.delete_entry("dynamic-v1", &key("/a")).await.unwrap());
        assert!(!storage.delete_entry("dynamic-v1", &key("/a")).await.unwrap());
        let stats = storage.stats().await.unwrap();
        assert_eq!(stats[0].entries, 1);
    }

    #[tokio::test]
    async fn test_partial_merge_keeps_index_consistent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::load(temp_dir.path()).await.unwrap();
        storage.put("static-v1", key("/a"), snapshot("old")).await.unwrap();

        // 目标位置被目录占用，第二个条目的元数据无法移入
        let blocked = DiskStorage::meta_path(&temp_dir.path().join("static-v1"), &DiskStorage::entry_stem(&key("/b")));
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();

        let result = storage
            .put_all("static-v1", vec![(key("/a"), snapshot("new")), (key("/b"), snapshot("b"))])
            .await;
        assert!(result.is_err());

        let hit = storage.match_in("static-v1", &key("/a")).await.unwrap().unwrap();
        assert_eq!(hit.body, "new");
        assert_eq!(storage.entry_keys("static-v1").await.unwrap(), vec![key("/a")]);

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_generation_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::load(temp_dir.path()).await.unwrap();
        assert!(storage.open("../escape").await.is_err());
        assert!(storage.open(".hidden").await.is_err());
        assert!(storage.open("static-v1").await.is_ok());
    }
}
