use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::{CacheKey, ResponseSnapshot, ResponseType};

/// 磁盘条目旁的 JSON 元数据文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: CacheKey,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub response_type: ResponseType,
    pub url: Option<String>,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

impl EntryMetadata {
    pub fn from_snapshot(key: CacheKey, snapshot: &ResponseSnapshot) -> Self {
        Self {
            key,
            status: snapshot.status,
            headers: snapshot.headers.clone(),
            response_type: snapshot.response_type,
            url: snapshot.url.clone(),
            stored_at: snapshot.stored_at.unwrap_or_else(Utc::now),
            size: snapshot.body.len() as u64,
        }
    }

    pub fn into_snapshot(self, body: Bytes) -> ResponseSnapshot {
        ResponseSnapshot {
            status: self.status,
            headers: self.headers,
            body,
            response_type: self.response_type,
            url: self.url,
            stored_at: Some(self.stored_at),
        }
    }
}
