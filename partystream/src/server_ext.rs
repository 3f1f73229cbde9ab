//! Routes HTTP du proxy et de la diffusion live
//!
//! - `GET /proxy/stream` : titre courant mis en mémoire, servi par plages
//! - `GET /radio/stream?key=` : flux MP3 live, protégé par jeton
//! - `POST /radio/token` : délivre un jeton d'écoute

use std::net::SocketAddr;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use partyplayer::BroadcastSwitch;
use partyserver::{parse_range, RangeError, Server};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{LiveBroadcast, ProxyStreamer, StreamTokens};

const PROXY_CONTENT_TYPE: &str = "audio/mp4";

// ============================================================================
// PROXY
// ============================================================================

async fn proxy_stream(State(proxy): State<Arc<ProxyStreamer>>, headers: HeaderMap) -> Response {
    let snapshot = proxy.wait_ready(proxy.settings().ready_timeout).await;
    let Some(buffer) = snapshot.buffer.clone().filter(|_| snapshot.is_servable()) else {
        debug!(status = ?snapshot.status, "Proxy stream requested but not ready");
        return (StatusCode::SERVICE_UNAVAILABLE, "Stream not ready").into_response();
    };
    let total = buffer.total();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PROXY_CONTENT_TYPE),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(range_header) = range_header else {
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(total));
        let body = Body::from_stream(proxy.stream_range(&snapshot, 0, total - 1));
        return (StatusCode::OK, response_headers, body).into_response();
    };

    let range = match parse_range(&range_header, total) {
        Ok(r) => r,
        Err(RangeError::Malformed) => return StatusCode::BAD_REQUEST.into_response(),
        Err(RangeError::Unsatisfiable) => {
            let mut h = HeaderMap::new();
            if let Ok(v) = HeaderValue::from_str(&format!("bytes */{}", total)) {
                h.insert(header::CONTENT_RANGE, v);
            }
            return (StatusCode::RANGE_NOT_SATISFIABLE, h).into_response();
        }
    };

    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
    if let Ok(v) = HeaderValue::from_str(&range.content_range(total)) {
        response_headers.insert(header::CONTENT_RANGE, v);
    }
    let body = Body::from_stream(proxy.stream_range(&snapshot, range.start, range.end));
    (StatusCode::PARTIAL_CONTENT, response_headers, body).into_response()
}

/// Router du proxy (`/stream`, à monter sous `/proxy`)
pub fn create_proxy_router(proxy: Arc<ProxyStreamer>) -> Router {
    Router::new()
        .route("/stream", get(proxy_stream))
        .with_state(proxy)
}

// ============================================================================
// DIFFUSION LIVE
// ============================================================================

#[derive(Clone)]
struct RadioState {
    live: Arc<LiveBroadcast>,
    tokens: Arc<StreamTokens>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
    url: String,
}

/// Adresse du client, en tenant compte d'un reverse proxy
fn remote_addr(headers: &HeaderMap, connect: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| connect.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn radio_stream(
    State(state): State<RadioState>,
    Query(query): Query<StreamQuery>,
    connect: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
) -> Response {
    if !state.live.is_enabled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Live stream is disabled").into_response();
    }
    let valid = query
        .key
        .as_deref()
        .is_some_and(|key| state.tokens.validate(key));
    if !valid {
        return (StatusCode::FORBIDDEN, "Invalid or expired stream key").into_response();
    }

    let remote = remote_addr(&headers, connect.map(|Extension(ConnectInfo(a))| a));
    let (guard, mut rx) = match state.live.listen(remote) {
        Ok(l) => l,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    };

    let body = stream! {
        let _guard = guard;
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, std::io::Error>(chunk);
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );
    response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (StatusCode::OK, response_headers, Body::from_stream(body)).into_response()
}

async fn radio_token(
    State(state): State<RadioState>,
    Json(request): Json<TokenRequest>,
) -> Response {
    if !state.live.is_enabled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Live stream is disabled").into_response();
    }
    if request.user_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing user_id").into_response();
    }
    let token = state.tokens.generate(&request.user_id);
    let url = format!(
        "{}/radio/stream?key={}",
        state.base_url.trim_end_matches('/'),
        token
    );
    Json(TokenResponse { token, url }).into_response()
}

/// Router de la diffusion live (`/stream` et `/token`, à monter sous `/radio`)
pub fn create_radio_router(
    live: Arc<LiveBroadcast>,
    tokens: Arc<StreamTokens>,
    base_url: impl Into<String>,
) -> Router {
    Router::new()
        .route("/stream", get(radio_stream))
        .route("/token", post(radio_token))
        .with_state(RadioState {
            live,
            tokens,
            base_url: base_url.into(),
        })
}

/// Trait d'extension pour exposer le proxy et le live sur partyserver
pub trait PartyStreamExt {
    /// Enregistre `/proxy/stream`, `/radio/stream` et `/radio/token`
    async fn init_party_stream(
        &mut self,
        proxy: Arc<ProxyStreamer>,
        live: Arc<LiveBroadcast>,
        tokens: Arc<StreamTokens>,
    );
}

impl PartyStreamExt for Server {
    async fn init_party_stream(
        &mut self,
        proxy: Arc<ProxyStreamer>,
        live: Arc<LiveBroadcast>,
        tokens: Arc<StreamTokens>,
    ) {
        let base_url = self.info().base_url;
        self.add_router("/proxy", create_proxy_router(proxy)).await;
        self.add_router("/radio", create_radio_router(live, tokens, base_url))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_addr_prefers_forwarded_headers() {
        let connect: Option<SocketAddr> = "192.168.1.5:40000".parse().ok();

        let mut h = HeaderMap::new();
        assert_eq!(remote_addr(&h, connect), "192.168.1.5");

        h.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(remote_addr(&h, connect), "10.0.0.2");

        h.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(remote_addr(&h, connect), "203.0.113.7");

        assert_eq!(remote_addr(&HeaderMap::new(), None), "unknown");
    }
}
