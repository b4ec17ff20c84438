use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CacheStorage, EvictionPolicy};
use crate::error::Result;

/// 周期性清理动态代中超过 `max_age` 的条目
pub struct ExpirySweeper {
    storage: Arc<dyn CacheStorage>,
    generation: String,
    policy: EvictionPolicy,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        generation: String,
        policy: EvictionPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            generation,
            policy,
            interval,
        }
    }

    pub async fn sweep(&self) -> Result<usize> {
        let Some(cutoff) = self.policy.cutoff(Utc::now()) else {
            return Ok(0);
        };
        let removed = self.storage.remove_older_than(&self.generation, cutoff).await?;
        if removed > 0 {
            info!("Swept {} expired entries from {}", removed, self.generation);
        }
        Ok(removed)
    }

    pub fn start(self) -> JoinHandle<()> {
        info!(
            "Starting expiry sweeper for {} with interval {:?}",
            self.generation, self.interval
        );
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                debug!("Running expiry sweep");
                if let Err(e) = self.sweep().await {
                    warn!("Expiry sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::request::{CacheKey, ResponseSnapshot};
    use hyper::Method;
    use url::Url;

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let storage = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        let url = Url::parse("http://app.test/old").unwrap();
        storage
            .put(
                "dynamic-v1",
                CacheKey::new(&Method::GET, &url),
                ResponseSnapshot::new(200, "old").stamped(now - chrono::Duration::hours(3)),
            )
            .await
            .unwrap();
        let url = Url::parse("http://app.test/new").unwrap();
        storage
            .put("dynamic-v1", CacheKey::new(&Method::GET, &url), ResponseSnapshot::new(200, "new").stamped(now))
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(
            storage.clone(),
            "dynamic-v1".into(),
            EvictionPolicy::unbounded().with_max_age(Duration::from_secs(3600)),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert_eq!(storage.entry_keys("dynamic-v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_without_max_age_is_noop() {
        let storage = Arc::new(MemoryStorage::new());
        let sweeper = ExpirySweeper::new(
            storage,
            "dynamic-v1".into(),
            EvictionPolicy::default(),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
    }
}
