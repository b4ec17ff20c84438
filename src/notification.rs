use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;

/// 推送事件，载荷可能缺失
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    pub fn empty() -> Self {
        Self { data: None }
    }

    /// 载荷文本；缺失时为空字符串
    pub fn text(&self) -> String {
        self.data
            .as_ref()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// 毫秒时间戳
    pub date_of_arrival: i64,
    pub primary_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    #[serde(flatten)]
    pub options: NotificationOptions,
    pub shown_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show_notification(&self, title: &str, options: NotificationOptions) -> Result<()>;
}

/// 记录最近的通知并输出日志
#[derive(Debug)]
pub struct NotificationCenter {
    history: RwLock<VecDeque<Notification>>,
    capacity: usize,
}

impl NotificationCenter {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// 从旧到新
    pub async fn recent(&self) -> Vec<Notification> {
        self.history.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl Notifier for NotificationCenter {
    async fn show_notification(&self, title: &str, options: NotificationOptions) -> Result<()> {
        info!(
            title = %title,
            body = %options.body,
            key = %options.data.primary_key,
            "Showing notification"
        );

        let mut history = self.history.write().await;
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(Notification {
            title: title.to_string(),
            options,
            shown_at: Utc::now(),
        });
        Ok(())
    }
}
