use tracing::info;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` 未设置时使用；`request` 为每个请求的访问日志
pub const DEFAULT_FILTER: &str = "offline_cache_proxy=info,request=info";

pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

pub fn log_request(method: &str, path: &str, status: u16, duration: std::time::Duration) {
    info!(
        target: "request",
        method = %method,
        path = %path,
        status = status,
        duration_ms = %duration.as_millis(),
        "Request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_enables_request_log() {
        let filter = EnvFilter::try_new(DEFAULT_FILTER).unwrap();
        let directives = filter.to_string();
        assert!(directives.contains("request=info"));
        assert!(directives.contains("offline_cache_proxy=info"));
    }
}
