use lorebook_sync::{
    FileBackend, FileReadonlyBackend, FileReader, FileWriter, HttpBackendConfig, HttpFileBackend,
    SyncError,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpFileBackend {
    HttpFileBackend::new(HttpBackendConfig {
        base_url: format!("{}/wiki", server.uri()),
        token: Some("secret".to_string()),
        ..Default::default()
    })
    .unwrap()
}

// ── Config ──────────────────────────────────────────────────────

#[test]
fn http_config_default() {
    let cfg = HttpBackendConfig::default();
    assert!(cfg.token.is_none());
    assert_eq!(cfg.timeout_secs, 60);
}

#[test]
fn http_config_partial_json_uses_defaults() {
    let cfg: HttpBackendConfig =
        serde_json::from_str(r#"{"base_url":"https://example.com"}"#).unwrap();
    assert_eq!(cfg.base_url, "https://example.com");
    assert_eq!(cfg.timeout_secs, 60);
}

// ── Reads ───────────────────────────────────────────────────────

#[tokio::test]
async fn read_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/index.json"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = backend(&server).reader().read("index.json").await.unwrap();
    assert_eq!(bytes, Some(b"{}".to_vec()));
}

#[tokio::test]
async fn read_404_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/missing.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let bytes = backend(&server).reader().read("missing.json").await.unwrap();
    assert!(bytes.is_none());
}

#[tokio::test]
async fn read_server_error_is_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = backend(&server).reader().read("index.json").await.unwrap_err();
    assert!(matches!(err, SyncError::HttpStatus { status: 500, .. }));
}

#[tokio::test]
async fn read_unreachable_is_network_error() {
    let backend = HttpFileBackend::new(HttpBackendConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        timeout_secs: 2,
        ..Default::default()
    })
    .unwrap();

    let err = backend.reader().read("index.json").await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
}

// ── Commits ─────────────────────────────────────────────────────

#[tokio::test]
async fn commit_replays_buffer_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/wiki/files/a.txt"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/wiki/files/b.txt"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut writer = backend(&server).writer();
    writer.write("files/a.txt", b"hello".to_vec());
    writer.delete("files/b.txt");
    assert_eq!(writer.pending(), 2);
    writer.commit().await.unwrap();
    assert_eq!(writer.pending(), 0);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method.as_str(), "PUT");
    assert_eq!(requests[0].body, b"hello".to_vec());
    assert_eq!(requests[1].method.as_str(), "DELETE");
}

#[tokio::test]
async fn commit_stops_at_first_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/wiki/one"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/wiki/two"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut writer = backend(&server).writer();
    writer.write("one", vec![1]);
    writer.write("two", vec![2]);
    let err = writer.commit().await.unwrap_err();
    assert!(matches!(err, SyncError::HttpStatus { status: 403, .. }));
}

#[tokio::test]
async fn empty_commit_sends_nothing() {
    let server = MockServer::start().await;
    let mut writer = backend(&server).writer();
    writer.commit().await.unwrap();
    assert!(server.received_requests().await.unwrap().is_empty());
}
