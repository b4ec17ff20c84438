use url::Url;

use crate::error::{ProxyError, Result};

/// 将代理对外的源地址改写为上游应用服务器地址
#[derive(Debug, Clone, Default)]
pub struct UrlMapper {
    rules: Vec<(String, String)>,
}

impl UrlMapper {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// 以 `origin` 为前缀的 URL 改写到 `upstream`
    pub fn for_upstream(origin: &Url, upstream: &Url) -> Self {
        let mut mapper = Self::new();
        mapper.add_rule(origin.as_str().to_string(), upstream.as_str().to_string());
        mapper
    }

    pub fn add_rule(&mut self, pattern: String, target: String) {
        // 更长的前缀优先匹配
        self.rules.push((pattern, target));
        self.rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn map_url(&self, url: &Url) -> Result<Url> {
        for (pattern, target) in &self.rules {
            if let Some(rest) = url.as_str().strip_prefix(pattern.as_str()) {
                let mapped = format!("{}{}", target, rest);
                return Url::parse(&mapped)
                    .map_err(|e| ProxyError::InvalidInput(format!("{}: {}", mapped, e)));
            }
        }

        Ok(url.clone())
    }
}
