use hyper::Uri;
use url::Url;

use crate::error::{ProxyError, Result};

/// 将请求的 Uri 转换为绝对 URL
///
/// origin-form（`/path?query`）的请求以 `origin` 补全；absolute-form 的请求保持原样，
/// 这样跨域请求也能经过代理。
///
/// # Examples
/// ```
/// use offline_cache_proxy::utils::absolute_url;
/// use url::Url;
///
/// let origin = Url::parse("http://app.test/").unwrap();
/// let uri = "/jobs?page=2".parse().unwrap();
/// let url = absolute_url(&uri, &origin).unwrap();
/// assert_eq!(url.as_str(), "http://app.test/jobs?page=2");
/// ```
pub fn absolute_url(uri: &Uri, origin: &Url) -> Result<Url> {
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|e| ProxyError::InvalidInput(format!("{}: {}", uri, e)));
    }

    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    origin
        .join(path)
        .map_err(|e| ProxyError::InvalidInput(format!("{}: {}", path, e)))
}

/// 从 URL 字符串中提取路径部分
pub fn get_url_path(url: &str) -> &str {
    url.split('?')
        .next()
        .unwrap_or(url)
        .split('#')
        .next()
        .unwrap_or(url)
}

/// 检查URL是否为绝对URL
pub fn is_absolute_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 将相对路径解析为 `base` 下的绝对 URL
///
/// # Examples
/// ```
/// use offline_cache_proxy::utils::resolve_url;
/// use url::Url;
///
/// let base = Url::parse("http://app.test/").unwrap();
/// assert_eq!(resolve_url(&base, "./").unwrap().as_str(), "http://app.test/");
/// assert_eq!(resolve_url(&base, "logo192.png").unwrap().as_str(), "http://app.test/logo192.png");
/// ```
pub fn resolve_url(base: &Url, relative: &str) -> Result<Url> {
    if is_absolute_url(relative) {
        return Url::parse(relative)
            .map_err(|e| ProxyError::InvalidInput(format!("{}: {}", relative, e)));
    }
    base.join(relative)
        .map_err(|e| ProxyError::InvalidInput(format!("{}: {}", relative, e)))
}

/// 同源判断：scheme、host、port 都一致
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("http://app.test/").unwrap()
    }

    #[test]
    fn test_absolute_url() {
        let uri: Uri = "http://cdn.test/lib.js?v=1".parse().unwrap();
        assert_eq!(absolute_url(&uri, &origin()).unwrap().as_str(), "http://cdn.test/lib.js?v=1");

        let uri: Uri = "/index.html".parse().unwrap();
        assert_eq!(absolute_url(&uri, &origin()).unwrap().as_str(), "http://app.test/index.html");
    }

    #[test]
    fn test_get_url_path() {
        assert_eq!(get_url_path("http://app.test/path?query=1"), "http://app.test/path");
        assert_eq!(get_url_path("/path?query=1#fragment"), "/path");
        assert_eq!(get_url_path("/path"), "/path");
    }

    #[test]
    fn test_is_absolute_url() {
        assert!(is_absolute_url("http://app.test"));
        assert!(is_absolute_url("https://app.test"));
        assert!(!is_absolute_url("relative/path"));
        assert!(!is_absolute_url("/absolute/path"));
    }

    #[test]
    fn test_resolve_url() {
        let base = origin();
        assert_eq!(resolve_url(&base, "index.html").unwrap().as_str(), "http://app.test/index.html");
        assert_eq!(resolve_url(&base, "/src/main.js").unwrap().as_str(), "http://app.test/src/main.js");
        assert_eq!(
            resolve_url(&base, "http://other.test/file.js").unwrap().as_str(),
            "http://other.test/file.js"
        );
    }

    #[test]
    fn test_same_origin() {
        let a = Url::parse("http://app.test/a").unwrap();
        assert!(same_origin(&a, &origin()));
        assert!(!same_origin(&Url::parse("https://app.test/a").unwrap(), &origin()));
        assert!(!same_origin(&Url::parse("http://app.test:8081/a").unwrap(), &origin()));
    }
}
