use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::utils;

/// 请求模式，对应浏览器的 `Request.mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    /// 从请求头推断模式。优先使用 `Sec-Fetch-Mode`，否则 GET + `Accept: text/html` 视为导航。
    pub fn from_headers(method: &Method, headers: &HeaderMap) -> Self {
        let fetch_mode = headers
            .get("sec-fetch-mode")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());

        match fetch_mode.as_deref() {
            Some("navigate") => RequestMode::Navigate,
            Some("same-origin") => RequestMode::SameOrigin,
            Some("cors") => RequestMode::Cors,
            Some("no-cors") => RequestMode::NoCors,
            _ => {
                let accepts_html = headers
                    .get(hyper::header::ACCEPT)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.contains("text/html"))
                    .unwrap_or(false);
                if *method == Method::GET && accepts_html {
                    RequestMode::Navigate
                } else {
                    RequestMode::NoCors
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResourceRequest {
    pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
        Self {
            method,
            url,
            mode,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::NoCors)
    }

    pub fn navigate(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::Navigate)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    pub fn is_retrieval(&self) -> bool {
        self.method == Method::GET
    }

    /// 带凭据的请求，其响应可能是某个用户私有的
    pub fn carries_credentials(&self) -> bool {
        self.headers.contains_key(hyper::header::COOKIE)
            || self.headers.contains_key(hyper::header::AUTHORIZATION)
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }
}

/// 规范化的请求标识：方法 + 去掉 fragment 的绝对 URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        CacheKey(format!("{} {}", method.as_str(), url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Basic,
    Cors,
    Opaque,
}

impl ResponseType {
    /// 根据请求目标与代理源判断响应类型（不跟随重定向，请求 URL 即响应 URL）
    pub fn classify(request: &ResourceRequest, origin: &Url) -> Self {
        if utils::same_origin(&request.url, origin) {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

/// 一次响应的完整快照。`body` 为共享的 `Bytes`，克隆即为复制响应。
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub response_type: ResponseType,
    pub url: Option<String>,
    pub stored_at: Option<DateTime<Utc>>,
}

impl ResponseSnapshot {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            url: None,
            stored_at: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_url(mut self, url: &Url) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 只有同源 200 响应才写入动态缓存；缓存为所有客户端共享，私有响应不缓存
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
            && self.response_type == ResponseType::Basic
            && !self.is_private()
    }

    /// `Cache-Control: private / no-store`，或设置了 cookie
    pub fn is_private(&self) -> bool {
        let forbids_storage = self
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cache-control"))
            .flat_map(|(_, v)| v.split(','))
            .map(|directive| directive.trim().to_ascii_lowercase())
            .any(|directive| {
                directive == "no-store" || directive == "private" || directive.starts_with("private=")
            });
        forbids_storage || self.header("set-cookie").is_some()
    }

    /// 返回一个带存储时间戳的副本，用于写入缓存
    pub fn stamped(&self, at: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.stored_at = Some(at);
        copy
    }

    pub fn synthetic_offline() -> Self {
        ResponseSnapshot::new(503, "Service Unavailable: offline and no cached copy available")
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_header("cache-control", "no-store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, ACCEPT};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_mode_from_fetch_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        assert_eq!(RequestMode::from_headers(&Method::GET, &headers), RequestMode::Navigate);

        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        assert_eq!(RequestMode::from_headers(&Method::GET, &headers), RequestMode::Cors);
    }

    #[test]
    fn test_mode_falls_back_to_accept_header() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        assert_eq!(RequestMode::from_headers(&Method::GET, &headers), RequestMode::Navigate);
        assert_eq!(RequestMode::from_headers(&Method::POST, &headers), RequestMode::NoCors);
        assert_eq!(RequestMode::from_headers(&Method::GET, &HeaderMap::new()), RequestMode::NoCors);
    }

    #[test]
    fn test_cache_key_ignores_fragment() {
        let a = ResourceRequest::get(url("http://app.test/index.html#top")).key();
        let b = ResourceRequest::get(url("http://app.test/index.html")).key();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET http://app.test/index.html");

        let c = ResourceRequest::get(url("http://app.test/index.html?v=2")).key();
        assert_ne!(a, c);
    }

    #[test]
    fn test_classify_response_type() {
        let origin = url("http://app.test/");
        let same = ResourceRequest::get(url("http://app.test/app.js"));
        assert_eq!(ResponseType::classify(&same, &origin), ResponseType::Basic);

        let cross = ResourceRequest::get(url("http://cdn.test/lib.js"));
        assert_eq!(ResponseType::classify(&cross, &origin), ResponseType::Opaque);

        let cors = ResourceRequest::new(Method::GET, url("http://api.test/jobs"), RequestMode::Cors);
        assert_eq!(ResponseType::classify(&cors, &origin), ResponseType::Cors);
    }

    #[test]
    fn test_cacheable_only_basic_200() {
        assert!(ResponseSnapshot::new(200, "ok").is_cacheable());
        assert!(!ResponseSnapshot::new(404, "missing").is_cacheable());
        assert!(!ResponseSnapshot::new(200, "x").with_type(ResponseType::Opaque).is_cacheable());
        assert!(!ResponseSnapshot::new(200, "x").with_type(ResponseType::Cors).is_cacheable());
    }

    #[test]
    fn test_private_responses_are_not_cacheable() {
        let private = ResponseSnapshot::new(200, "account").with_header("Cache-Control", "max-age=60, Private");
        assert!(private.is_private());
        assert!(!private.is_cacheable());

        let no_store = ResponseSnapshot::new(200, "x").with_header("cache-control", "no-store");
        assert!(!no_store.is_cacheable());

        let session = ResponseSnapshot::new(200, "x").with_header("set-cookie", "session=abc");
        assert!(!session.is_cacheable());

        let public = ResponseSnapshot::new(200, "x").with_header("cache-control", "public, max-age=600");
        assert!(public.is_cacheable());
    }

    #[test]
    fn test_credentialed_requests() {
        let mut headers = HeaderMap::new();
        headers.insert(hyper::header::COOKIE, HeaderValue::from_static("session=alice"));
        assert!(ResourceRequest::get(url("http://app.test/account")).with_headers(headers).carries_credentials());

        let mut headers = HeaderMap::new();
        headers.insert(hyper::header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        assert!(ResourceRequest::get(url("http://app.test/api")).with_headers(headers).carries_credentials());

        assert!(!ResourceRequest::get(url("http://app.test/")).carries_credentials());
    }

    #[test]
    fn test_synthetic_offline_response() {
        let resp = ResponseSnapshot::synthetic_offline();
        assert_eq!(resp.status, 503);
        assert_eq!(resp.header("Cache-Control"), Some("no-store"));
        assert!(!resp.is_cacheable());
    }
}
