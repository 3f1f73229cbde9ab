//! Routes HTTP du cache média
//!
//! - `GET /media/{file}` : fichier en cache, avec support de `Range`
//! - `GET /api/cache/records` : état de l'index

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use partyserver::{parse_range, RangeError, Server};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::{CacheRecord, MediaCache};

fn content_type_for(path: &FsPath) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") | Some("aac") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

async fn serve_media(
    State(cache): State<Arc<MediaCache>>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(path) = cache.path_for_file(&file) else {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    };

    let mut handle = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!("Error opening file {:?}: {}", path, e);
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };
    let total = match handle.metadata().await {
        Ok(m) => m.len(),
        Err(e) => {
            warn!("Error reading metadata of {:?}: {}", path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&path)),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(range_header) = range_header else {
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(total));
        let body = Body::from_stream(ReaderStream::new(handle));
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

    if let Err(e) = handle.seek(std::io::SeekFrom::Start(range.start)).await {
        warn!("Error seeking in {:?}: {}", path, e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
    if let Ok(v) = HeaderValue::from_str(&range.content_range(total)) {
        response_headers.insert(header::CONTENT_RANGE, v);
    }
    let body = Body::from_stream(ReaderStream::new(handle.take(range.len())));
    (StatusCode::PARTIAL_CONTENT, response_headers, body).into_response()
}

#[derive(Serialize)]
struct CacheOverview {
    total_bytes: u64,
    max_bytes: u64,
    records: Vec<CacheRecord>,
}

async fn list_records(State(cache): State<Arc<MediaCache>>) -> impl IntoResponse {
    Json(CacheOverview {
        total_bytes: cache.total_size(),
        max_bytes: cache.max_bytes(),
        records: cache.records(),
    })
}

/// Router des fichiers du cache (`/{file}`, à monter sous `/media`)
pub fn create_media_router(cache: Arc<MediaCache>) -> Router {
    Router::new()
        .route("/{file}", get(serve_media))
        .with_state(cache)
}

/// Trait d'extension pour exposer le cache média sur partyserver
pub trait MediaCacheExt {
    /// Enregistre `/media/{file}` et `/api/cache/records`
    async fn init_media_cache(&mut self, cache: Arc<MediaCache>);
}

impl MediaCacheExt for Server {
    async fn init_media_cache(&mut self, cache: Arc<MediaCache>) {
        self.add_router(crate::MEDIA_ROUTE, create_media_router(cache.clone()))
            .await;
        self.add_handler_with_state("/api/cache/records", list_records, cache)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheSettings, DownloadTarget, Fetcher};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    #[derive(Debug)]
    struct NoFetch;

    #[async_trait::async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, _: &DownloadTarget, _: &FsPath) -> anyhow::Result<u64> {
            anyhow::bail!("no network in tests")
        }
    }

    fn setup() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("song.mp3"), (0u8..100).collect::<Vec<_>>()).unwrap();
        let cache = MediaCache::new(CacheSettings::new(dir.path(), 10_000), Arc::new(NoFetch)).unwrap();
        (dir, create_media_router(cache))
    }

    #[tokio::test]
    async fn serves_full_file() {
        let (_dir, router) = setup();
        let resp = router
            .oneshot(Request::get("/song.mp3").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/mpeg");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 100);
    }

    #[tokio::test]
    async fn serves_partial_content() {
        let (_dir, router) = setup();
        let resp = router
            .oneshot(
                Request::get("/song.mp3")
                    .header(header::RANGE, "bytes=10-19")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 10-19/100");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &(10u8..20).collect::<Vec<_>>()[..]);
    }

    #[tokio::test]
    async fn unknown_file_is_404_and_bad_range_is_416() {
        let (_dir, router) = setup();
        let resp = router
            .clone()
            .oneshot(Request::get("/other.mp3").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = router
            .oneshot(
                Request::get("/song.mp3")
                    .header(header::RANGE, "bytes=500-")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }
}
