use url::Url;

use crate::error::Result;
use crate::utils::resolve_url;

/// 缓存代名称：`static-<version>` 与 `dynamic-<version>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationNames {
    pub static_name: String,
    pub dynamic_name: String,
}

impl GenerationNames {
    pub fn for_version(version: &str) -> Self {
        Self {
            static_name: format!("static-{}", version),
            dynamic_name: format!("dynamic-{}", version),
        }
    }

    /// 激活时保留的代
    pub fn whitelist(&self) -> Vec<String> {
        vec![self.static_name.clone(), self.dynamic_name.clone()]
    }

    /// 查找顺序：静态代优先于动态代
    pub fn priority(&self) -> Vec<String> {
        vec![self.static_name.clone(), self.dynamic_name.clone()]
    }

    pub fn is_whitelisted(&self, name: &str) -> bool {
        name == self.static_name || name == self.dynamic_name
    }
}

/// 安装时预缓存的资源清单，按配置顺序，已解析为绝对 URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<Url>,
    offline_page: Url,
}

impl Manifest {
    /// 离线页不在清单中时会被追加，保证回退页一定被预缓存
    pub fn new<S: AsRef<str>>(origin: &Url, paths: &[S], offline_page: &str) -> Result<Self> {
        let mut entries: Vec<Url> = Vec::with_capacity(paths.len() + 1);
        for path in paths {
            let url = resolve_url(origin, path.as_ref())?;
            if !entries.contains(&url) {
                entries.push(url);
            }
        }

        let offline_page = resolve_url(origin, offline_page)?;
        if !entries.contains(&offline_page) {
            entries.push(offline_page.clone());
        }

        Ok(Self {
            entries,
            offline_page,
        })
    }

    pub fn entries(&self) -> &[Url] {
        &self.entries
    }

    pub fn offline_page(&self) -> &Url {
        &self.offline_page
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
