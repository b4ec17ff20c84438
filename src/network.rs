use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Body, Client, Request};
use hyper_tls::HttpsConnector;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::request::{ResourceRequest, ResponseSnapshot, ResponseType};
use crate::url_mapper::UrlMapper;

/// 逐跳头，不转发也不缓存
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// 网络访问能力。连接失败一律映射为 `ProxyError::Network`。
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot>;
}

pub struct HttpFetcher {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    origin: Url,
    mapper: UrlMapper,
}

impl HttpFetcher {
    pub fn new(origin: Url, upstream: Url) -> Self {
        let mapper = UrlMapper::for_upstream(&origin, &upstream);
        Self {
            client: Client::builder().build(HttpsConnector::new()),
            origin,
            mapper,
        }
    }

    fn build_request(&self, request: &ResourceRequest, target: &Url) -> Result<Request<Body>> {
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(target.as_str());

        for (name, value) in request.headers.iter() {
            if !is_hop_by_hop(name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot> {
        let target = self.mapper.map_url(&request.url)?;
        debug!("Fetching {} via {}", request.url, target);

        let req = self.build_request(request, &target)?;
        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| ProxyError::Network(e.to_string()))?;

        if status >= 500 {
            warn!("Upstream returned {} for {}", status, request.url);
        }

        Ok(ResponseSnapshot {
            status,
            headers,
            body,
            response_type: ResponseType::classify(request, &self.origin),
            url: Some(request.url.to_string()),
            stored_at: None,
        })
    }
}

/// 将快照转换回 hyper 响应
pub fn into_response(snapshot: ResponseSnapshot) -> hyper::Response<Body> {
    let mut response = hyper::Response::new(Body::from(snapshot.body));
    *response.status_mut() =
        hyper::StatusCode::from_u16(snapshot.status).unwrap_or(hyper::StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in snapshot.headers {
        if is_hop_by_hop(&name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    response
}
