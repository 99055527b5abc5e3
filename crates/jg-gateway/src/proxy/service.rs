//! A single reverse-proxy listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tracing::{debug, info, warn};

use jg_core::config::ProxyConfig;
use jg_core::{ProxyKey, ProxyMeta};

use super::ProxyError;

static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Connection-scoped headers that must not be forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards every request on one adapter port to one `node:port` target
pub struct ProxyService {
    key: ProxyKey,
    meta: ProxyMeta,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

#[derive(Clone)]
struct Upstream {
    client: reqwest::Client,
    target: Arc<str>,
}

impl ProxyService {
    /// Bind `bind_host:proxy_port` and start forwarding to `key`'s target.
    pub async fn start(
        job_name: &str,
        key: ProxyKey,
        proxy_port: u16,
        config: &ProxyConfig,
    ) -> Result<Self, ProxyError> {
        let addr = format!("{}:{}", config.bind_host, proxy_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ProxyError::Bind { addr, source })?;

        let meta = ProxyMeta::new(job_name, &key, local_addr.port());
        let upstream = Upstream {
            client: reqwest::Client::builder()
                .connect_timeout(config.read_timeout)
                .pool_idle_timeout(config.idle_timeout)
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
            target: Arc::from(meta.target_addr.as_str()),
        };

        let app = Router::new()
            .fallback(forward)
            .with_state(upstream)
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(|err: BoxError| async move {
                        debug!("Proxied request timed out: {}", err);
                        StatusCode::GATEWAY_TIMEOUT
                    }))
                    .layer(TimeoutLayer::new(config.read_timeout + config.write_timeout)),
            );

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            let target = meta.target_addr.clone();
            async move {
                let server = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move { cancel.cancelled().await });
                if let Err(e) = server.await {
                    warn!("Proxy {} -> {} stopped with error: {}", local_addr, target, e);
                }
            }
        });

        info!("Proxy {} -> {} started for job {}", local_addr, meta.target_addr, job_name);

        Ok(Self {
            key,
            meta,
            local_addr,
            cancel,
            task,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn key(&self) -> &ProxyKey {
        &self.key
    }

    /// Record describing this tunnel
    pub fn meta(&self) -> &ProxyMeta {
        &self.meta
    }

    /// Adapter-side listening port
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shut the listener down gracefully, aborting it if in-flight requests
    /// do not finish within the shutdown budget.
    pub async fn stop(self) {
        self.cancel.cancel();

        let mut task = self.task;
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(_) => info!("Proxy {} -> {} stopped", self.local_addr, self.meta.target_addr),
            Err(_) => {
                warn!(
                    "Proxy {} did not shut down within {:?}, closing it",
                    self.local_addr, self.shutdown_timeout
                );
                task.abort();
                let _ = task.await;
            }
        }
    }
}

async fn forward(
    State(upstream): State<Upstream>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", upstream.target, path);

    // An HTTP/1.1 request carries a body only when it announces one.
    let has_body =
        parts.headers.contains_key(header::CONTENT_LENGTH) || parts.headers.contains_key(header::TRANSFER_ENCODING);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    let host = headers.remove(header::HOST);
    add_forwarding_headers(&mut headers, peer, host);

    let mut request = upstream.client.request(parts.method, &url).headers(headers);
    if has_body {
        request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }
    let result = request.send().await;

    match result {
        Ok(response) => {
            let status = response.status();
            let mut headers = response.headers().clone();
            strip_hop_by_hop(&mut headers);

            let mut proxied = Response::new(Body::from_stream(response.bytes_stream()));
            *proxied.status_mut() = status;
            *proxied.headers_mut() = headers;
            proxied
        }
        Err(e) => {
            warn!("Proxy request to {} failed: {}", url, e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarding_headers(headers: &mut HeaderMap, peer: SocketAddr, host: Option<HeaderValue>) {
    let ip = peer.ip().to_string();

    let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip.clone(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&ip) {
        headers.insert(X_REAL_IP.clone(), value);
    }
    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST.clone(), host);
    }
}
