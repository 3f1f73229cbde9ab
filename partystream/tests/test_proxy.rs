use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use partyplayer::{Actor, PartyController, PlayerSettings, PROXY_STREAM_PATH};
use partyqueue::{QueueScheduler, QueueSettings};
use partysource::{CatalogSource, SourceRegistry};
use partystream::{ProxyError, ProxySettings, ProxyStatus, ProxyStreamer};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn upstream(len: usize) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/track.m4a"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body(len)))
        .mount(&server)
        .await;
    server
}

async fn collect(proxy: &Arc<ProxyStreamer>, start: u64, end: u64) -> Vec<u8> {
    let snapshot = proxy.snapshot();
    let mut stream = Box::pin(proxy.stream_range(&snapshot, start, end));
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

async fn wait_status(proxy: &ProxyStreamer, status: ProxyStatus) {
    for _ in 0..200 {
        if proxy.status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("proxy never reached {:?}, still {:?}", status, proxy.status());
}

#[tokio::test]
async fn start_allocates_buffer_and_serves_ranges() {
    let server = upstream(20_000).await;
    let proxy = ProxyStreamer::new(ProxySettings::default()).unwrap();

    let session = proxy
        .start(&format!("{}/track.m4a", server.uri()), &[])
        .await
        .unwrap();

    let snapshot = proxy.snapshot();
    assert_eq!(snapshot.session, session);
    assert!(snapshot.is_servable());
    assert_eq!(snapshot.buffer.as_ref().unwrap().total(), 20_000);

    let expected = body(20_000);
    assert_eq!(collect(&proxy, 0, 19_999).await, expected);
    assert_eq!(collect(&proxy, 100, 9_099).await, &expected[100..9_100]);

    wait_status(&proxy, ProxyStatus::Completed).await;
}

#[tokio::test]
async fn empty_upstream_is_rejected() {
    let server = upstream(0).await;
    let proxy = ProxyStreamer::new(ProxySettings::default()).unwrap();

    let err = proxy
        .start(&format!("{}/track.m4a", server.uri()), &[])
        .await
        .unwrap_err();

    assert_eq!(err, ProxyError::MissingLength);
    wait_status(&proxy, ProxyStatus::Error).await;
    assert!(!proxy.snapshot().is_servable());
}

#[tokio::test]
async fn oversized_upstream_is_rejected() {
    let server = upstream(4_096).await;
    let proxy = ProxyStreamer::new(ProxySettings {
        max_content_length: 1_000,
        ..ProxySettings::default()
    })
    .unwrap();

    let err = proxy
        .start(&format!("{}/track.m4a", server.uri()), &[])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ProxyError::TooLarge {
            length: 4_096,
            max: 1_000
        }
    );
}

#[tokio::test]
async fn upstream_error_status_fails_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let proxy = ProxyStreamer::new(ProxySettings::default()).unwrap();

    let err = proxy
        .start(&format!("{}/track.m4a", server.uri()), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::Upstream(ref m) if m.contains("403")));
    assert!(matches!(
        proxy.start("ftp://nowhere/track", &[]).await,
        Err(ProxyError::InvalidUrl(_))
    ));
}

#[tokio::test]
async fn configured_referer_is_sent_unless_source_sets_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/default.m4a"))
        .and(header("referer", "https://party.example/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body(64)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/own.m4a"))
        .and(header("referer", "https://source.example/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body(64)))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = ProxyStreamer::new(ProxySettings {
        referer: Some("https://party.example/".into()),
        ..ProxySettings::default()
    })
    .unwrap();

    proxy
        .start(&format!("{}/default.m4a", server.uri()), &[])
        .await
        .unwrap();
    proxy
        .start(
            &format!("{}/own.m4a", server.uri()),
            &[("Referer".into(), "https://source.example/".into())],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_and_restart_end_the_previous_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body(1_000))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    let proxy = ProxyStreamer::new(ProxySettings::default()).unwrap();
    let url = format!("{}/track.m4a", server.uri());

    let first = proxy.start(&url, &[]).await.unwrap();
    let old = proxy.snapshot();
    let second = proxy.start(&url, &[]).await.unwrap();
    assert!(second > first);

    // Le flux d'une session remplacée se termine sans attendre
    let mut stale = Box::pin(proxy.stream_range(&old, 0, 999));
    let mut received = 0;
    while let Some(chunk) = stale.next().await {
        received += chunk.unwrap().len();
    }
    assert!(received <= 1_000);

    proxy.cancel();
    assert_eq!(proxy.status(), ProxyStatus::Idle);
    assert!(proxy.snapshot().buffer.is_none());

    let ready = proxy.wait_ready(Duration::from_millis(100)).await;
    assert_eq!(ready.status, ProxyStatus::Idle);
}

#[tokio::test]
async fn binder_follows_proxied_sessions() {
    let server = upstream(2_048).await;
    let catalog = format!(
        r#"
platform: catalog
tracks:
  - id: remote
    title: Remote
    duration_ms: 60000
    url: {}/track.m4a
    needs_proxy: true
"#,
        server.uri()
    );
    let mut sources = SourceRegistry::new();
    sources.register(Arc::new(CatalogSource::from_yaml_str(&catalog).unwrap()));
    let queue = Arc::new(QueueScheduler::new(QueueSettings {
        auto_dj: false,
        ..QueueSettings::default()
    }));
    let controller = PartyController::new(PlayerSettings::default(), sources, queue, None);

    let alice = Actor::user("u1", "Alice");
    controller.enqueue(&alice, "catalog", "remote").await.unwrap();
    controller.request_next().await;
    assert_eq!(
        controller.state().now_playing.map(|n| n.media_url).as_deref(),
        Some(PROXY_STREAM_PATH)
    );

    let proxy = ProxyStreamer::new(ProxySettings::default()).unwrap();
    let shutdown = CancellationToken::new();
    let binder = proxy.spawn_binder(controller.clone(), shutdown.clone());

    wait_status(&proxy, ProxyStatus::Completed).await;
    assert_eq!(collect(&proxy, 0, 2_047).await, body(2_048));

    controller.skip(&alice).await.unwrap();
    wait_status(&proxy, ProxyStatus::Idle).await;

    shutdown.cancel();
    binder.await.unwrap();
}
