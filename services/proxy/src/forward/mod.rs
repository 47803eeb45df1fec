//! The request forwarder: the axum handler serving every hostname on the public listener.

mod upgrade;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ForwardError, RoutingError};
use crate::metrics::MetricsSink;
use crate::reload::SnapshotHandle;
use crate::routing::Backend;

/// Shared state behind every request handler.
pub struct AppState {
    pub snapshot: SnapshotHandle,
    pub config: Arc<Config>,
    pub metrics: Arc<MetricsSink>,
    pub http_client: reqwest::Client,
}

/// The single fallback handler: hostname extraction, snapshot capture, backend selection,
/// dispatch, and error-to-redirect mapping (§4.6).
pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> Response {
    state.metrics.incr("requests");
    match forward(&state, peer, req).await {
        Ok(resp) => resp,
        Err(err) => {
            match &err {
                ForwardError::Routing(RoutingError::NoHostname) => {
                    state.metrics.incr("no_hostname")
                }
                ForwardError::Routing(RoutingError::NoBackend) => {
                    state.metrics.incr("no_backend")
                }
                _ => state.metrics.incr("errors"),
            }
            warn!(error = %err, "request failed");
            redirect_for(&state.config, &err)
        }
    }
}

async fn forward(
    state: &AppState,
    peer: SocketAddr,
    mut req: axum::extract::Request,
) -> Result<Response, ForwardError> {
    let hostname = extract_hostname(req.headers()).ok_or(RoutingError::NoHostname)?;

    // Single atomic load: every subsequent step in this request uses this one Arc<Snapshot>,
    // never a fresher one, even if a reload publishes concurrently (§8 property 1).
    let snapshot = state.snapshot.load_full();
    let frontend = snapshot
        .frontend_for_hostname(hostname.as_str())
        .ok_or(RoutingError::NoHostname)?;
    let backend = frontend.pick_backend().await?;

    // Header rewrites (§4.6 step 5) apply before dispatch, regardless of which path follows.
    rewrite_headers(req.headers_mut(), &state.config, peer);

    if is_upgrade_request(req.headers()) {
        upgrade::handle(&backend, req).await
    } else {
        simple_proxy(state, frontend.name.as_str(), &backend, req).await
    }
}

async fn simple_proxy(
    state: &AppState,
    frontend_name: &str,
    backend: &Backend,
    req: axum::extract::Request,
) -> Result<Response, ForwardError> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", backend.endpoint, path_and_query);

    let method = req.method().clone();
    let headers = req.headers().clone();

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|err| ForwardError::Upgrade(std::io::Error::other(err)))?;

    let upstream_req = state
        .http_client
        .request(method, &url)
        .headers(headers)
        .body(body_bytes);

    let upstream_resp = upstream_req.send().await?;

    state.metrics.incr(&format!(
        "{frontend_name}.{}.{}",
        backend.name,
        upstream_resp.status().as_u16()
    ));

    let mut builder = Response::builder().status(upstream_resp.status());
    for (name, value) in upstream_resp.headers() {
        builder = builder.header(name, value);
    }
    let body = Body::from_stream(upstream_resp.bytes_stream());
    builder
        .body(body)
        .map_err(|err| ForwardError::Upgrade(std::io::Error::other(err)))
}

fn extract_hostname(headers: &axum::http::HeaderMap) -> Option<relay_id::Hostname> {
    let host = headers.get(axum::http::header::HOST)?.to_str().ok()?;
    let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
    relay_id::Hostname::parse(host).ok()
}

fn is_upgrade_request(headers: &axum::http::HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false)
}

fn rewrite_headers(headers: &mut axum::http::HeaderMap, config: &Config, peer: SocketAddr) {
    if config.listener.send_request_start {
        if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
            if let Ok(value) = HeaderValue::from_str(&now.as_millis().to_string()) {
                headers.insert("x-request-start", value);
            }
        }
    }
    if !config.listener.forwarded_proto.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&config.listener.forwarded_proto) {
            headers.insert("x-forwarded-proto", value);
        }
    }
    if config.listener.forward_client_ip {
        if let Ok(value) = HeaderValue::from_str(&peer.ip().to_string()) {
            headers.insert("x-forwarded-for", value);
        }
    }
}

fn redirect_for(config: &Config, err: &ForwardError) -> Response {
    let target = match err {
        ForwardError::Routing(RoutingError::NoHostname) => &config.listener.redirect_no_hostname,
        ForwardError::Routing(RoutingError::NoBackend) => &config.listener.redirect_no_backend,
        _ => &config.listener.redirect_on_error,
    };
    let location = format!(
        "{target}?err={}",
        urlencoding_escape(err.reason())
    );
    info!(location = %location, "redirecting");
    (
        StatusCode::TEMPORARY_REDIRECT,
        [(axum::http::header::LOCATION, location)],
    )
        .into_response()
}

fn urlencoding_escape(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else if c == ' ' {
                "+".to_string()
            } else {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| format!("%{b:02X}"))
                    .collect::<String>()
            }
        })
        .collect()
}
