use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clients::ClientId;
use crate::error::{ProxyError, Result};
use crate::host::ProxyHost;
use crate::logger::log_request;
use crate::network::into_response;
use crate::notification::{NotificationCenter, PushEvent};
use crate::request::{RequestMode, ResourceRequest};
use crate::utils;

const STATUS_PATH: &str = "/__proxy/status";
const NOTIFICATIONS_PATH: &str = "/__proxy/notifications";
const PUSH_PATH: &str = "/__proxy/push";

/// 把宿主暴露为 HTTP 代理服务器
pub struct ProxyServer {
    addr: SocketAddr,
    origin: Url,
    host: Arc<ProxyHost>,
    notifications: Arc<NotificationCenter>,
}

impl ProxyServer {
    pub fn new(
        addr: SocketAddr,
        origin: Url,
        host: Arc<ProxyHost>,
        notifications: Arc<NotificationCenter>,
    ) -> Self {
        info!("Creating proxy server on {} for origin {}", addr, origin);
        Self {
            addr,
            origin,
            host,
            notifications,
        }
    }

    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        info!("Starting proxy server on {}", self.addr);

        let origin = self.origin.clone();
        let host = self.host.clone();
        let notifications = self.notifications.clone();

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            debug!("New connection from: {}", remote_addr);

            let origin = origin.clone();
            let host = host.clone();
            let notifications = notifications.clone();

            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| {
                    let origin = origin.clone();
                    let host = host.clone();
                    let notifications = notifications.clone();
                    Self::handle_request(req, remote_addr, origin, host, notifications)
                }))
            }
        });

        let server = Server::try_bind(&self.addr)
            .map_err(|e| ProxyError::Network(e.to_string()))?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown);
        info!("Proxy server is ready to accept connections");

        if let Err(e) = server.await {
            error!("Server error: {}", e);
            return Err(ProxyError::Network(e.to_string()));
        }

        Ok(())
    }

    async fn handle_request(
        req: Request<Body>,
        remote_addr: SocketAddr,
        origin: Url,
        host: Arc<ProxyHost>,
        notifications: Arc<NotificationCenter>,
    ) -> std::result::Result<Response<Body>, hyper::Error> {
        let started = Instant::now();
        let method = req.method().clone();
        let uri = req.uri().to_string();

        let response = match (req.method(), req.uri().path()) {
            (&Method::GET, STATUS_PATH) => Self::status(&host).await,
            (&Method::GET, NOTIFICATIONS_PATH) => json_response(StatusCode::OK, &notifications.recent().await),
            (&Method::POST, PUSH_PATH) => Self::push(req, &host).await,
            _ => {
                let client = ClientId::new(remote_addr.ip().to_string());
                Self::dispatch(req, client, &origin, &host).await
            }
        };

        log_request(
            method.as_str(),
            utils::get_url_path(&uri),
            response.status().as_u16(),
            started.elapsed(),
        );
        Ok(response)
    }

    async fn dispatch(
        req: Request<Body>,
        client: ClientId,
        origin: &Url,
        host: &ProxyHost,
    ) -> Response<Body> {
        let request = match Self::to_resource_request(req, origin).await {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting request: {}", e);
                return text_response(StatusCode::BAD_REQUEST, e.to_string());
            }
        };

        match host.dispatch_fetch(&client, &request).await {
            Ok(snapshot) => into_response(snapshot),
            Err(e) if e.is_network() => {
                warn!("Network failure for {}: {}", request.url, e);
                text_response(StatusCode::BAD_GATEWAY, e.to_string())
            }
            Err(e) => {
                error!("Failed to handle {}: {}", request.url, e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    async fn to_resource_request(req: Request<Body>, origin: &Url) -> Result<ResourceRequest> {
        let (parts, body) = req.into_parts();
        let url = utils::absolute_url(&parts.uri, origin)?;
        let mode = RequestMode::from_headers(&parts.method, &parts.headers);
        let body = hyper::body::to_bytes(body)
            .await
            .map_err(|e| ProxyError::InvalidInput(e.to_string()))?;

        Ok(ResourceRequest::new(parts.method, url, mode)
            .with_headers(parts.headers)
            .with_body(body))
    }

    async fn status(host: &ProxyHost) -> Response<Body> {
        match host.status().await {
            Ok(status) => json_response(StatusCode::OK, &status),
            Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    async fn push(req: Request<Body>, host: &ProxyHost) -> Response<Body> {
        let event = match hyper::body::to_bytes(req.into_body()).await {
            Ok(data) if data.is_empty() => PushEvent::empty(),
            Ok(data) => PushEvent::new(data),
            Err(e) => return text_response(StatusCode::BAD_REQUEST, e.to_string()),
        };

        match host.dispatch_push(event).await {
            Ok(()) => text_response(StatusCode::ACCEPTED, "accepted".to_string()),
            Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
