use chrono::{DateTime, Utc};
use std::time::Duration;

/// 动态代的淘汰策略。静态代从不淘汰。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_entries: Option<usize>,
    pub max_age: Option<Duration>,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_entries: Some(200),
            max_age: None,
        }
    }
}

impl EvictionPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            max_age: None,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn is_expired(&self, stored_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match (self.max_age, stored_at) {
            (Some(max_age), Some(stored_at)) => match chrono::Duration::from_std(max_age) {
                Ok(max_age) => now - stored_at > max_age,
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// 早于该时间存储的条目视为过期
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let max_age = chrono::Duration::from_std(self.max_age?).ok()?;
        Some(now - max_age)
    }
}
