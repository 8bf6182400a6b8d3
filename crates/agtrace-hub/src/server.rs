//! Axum application: localhost-only HTTP surface plus the websocket
//! Subscription Endpoint (spec.md §4.J, §6).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use agtrace_index::Store;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub broadcast_tx: broadcast::Sender<Envelope>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().map(is_localhost_origin).unwrap_or(false)
        }))
        .allow_methods([axum::http::Method::GET]);

    Router::new()
        .route("/ws", get(ws::upgrade))
        .layer(cors)
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(validate_host))
        .with_state(state)
}

fn is_localhost_origin(origin: &str) -> bool {
    origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .map(|rest| {
            let host = rest.split(':').next().unwrap_or(rest);
            host == "127.0.0.1" || host == "localhost" || host == "[::1]" || host == "::1"
        })
        .unwrap_or(false)
}

async fn validate_host(request: Request, next: Next) -> Result<Response, StatusCode> {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let hostname = host.split(':').next().unwrap_or(host);
    if hostname.is_empty() || hostname == "127.0.0.1" || hostname == "localhost" || hostname == "::1" || hostname == "[::1]" {
        Ok(next.run(request).await)
    } else {
        warn!(host, "rejected connection with untrusted Host header");
        Err(StatusCode::FORBIDDEN)
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let is_ws = request.uri().path() == "/ws";
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; connect-src 'self'"),
    );
    if is_ws {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
    response
}

/// Bind the Subscription Endpoint's listener. Unlike an interactive CLI tool,
/// the hub runs headless, so a taken port falls straight through to an
/// ephemeral one rather than prompting (spec.md §4.J).
pub async fn bind_with_fallback(requested_port: u16) -> Result<(TcpListener, u16)> {
    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    match TcpListener::bind(SocketAddr::new(loopback, requested_port)).await {
        Ok(listener) => {
            let port = listener.local_addr().map_err(Error::Io)?.port();
            Ok((listener, port))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            warn!(requested_port, "port already in use, falling back to an ephemeral port");
            let listener = TcpListener::bind(SocketAddr::new(loopback, 0)).await.map_err(Error::Io)?;
            let port = listener.local_addr().map_err(Error::Io)?.port();
            Ok((listener, port))
        }
        Err(err) => Err(Error::Bind(err.to_string())),
    }
}

pub async fn serve(state: AppState, requested_port: u16, cancel: tokio_util::sync::CancellationToken) -> Result<()> {
    let (listener, port) = bind_with_fallback(requested_port).await?;
    info!(port, "subscription endpoint listening on 127.0.0.1");
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_localhost_origins() {
        assert!(is_localhost_origin("http://127.0.0.1:5173"));
        assert!(is_localhost_origin("http://localhost:5173"));
        assert!(!is_localhost_origin("http://evil.example:5173"));
    }
}
