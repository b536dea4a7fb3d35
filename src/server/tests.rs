use super::*;
use crate::config::{Config, OllamaConfig};
use crate::database::{ChunkRecord, VectorStore};
use crate::embeddings::ollama::OllamaClient;
use crate::engine::Readiness;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIM: usize = 4;

/// Plain HTTP client that surfaces 4xx/5xx responses as responses
/// instead of errors, so tests can inspect their bodies.
fn http_agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into()
}

async fn state_with(server: &MockServer, readiness: Arc<Readiness>) -> (AppState, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let uri = url::Url::parse(&server.uri()).expect("uri should parse");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.ollama = OllamaConfig {
        host: uri.host_str().expect("host").to_string(),
        port: uri.port().expect("port"),
        embedding_dimension: DIM as u32,
        ..OllamaConfig::default()
    };

    let store = Arc::new(
        VectorStore::new(&config.vectors_path(), DIM)
            .await
            .expect("should create store"),
    );
    let client = Arc::new(
        OllamaClient::new(&config.ollama)
            .expect("should create client")
            .with_retry_attempts(1),
    );

    let engine = QueryEngine::new(&config, readiness, store, client);
    (
        AppState {
            engine: Arc::new(engine),
        },
        temp_dir,
    )
}

/// Serves the router on an ephemeral port and returns its base URL.
async fn serve(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind ephemeral port");
    let addr = listener.local_addr().expect("listener has an address");
    tokio::spawn(async move {
        axum::serve(listener, build_router(state))
            .await
            .expect("server should run");
    });
    format!("http://{}", addr)
}

fn get_json(url: &str) -> (u16, serde_json::Value) {
    let mut response = http_agent().get(url).call().expect("request should send");
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .expect("body should read");
    (status, serde_json::from_str(&body).expect("body is json"))
}

fn post_json(url: &str, body: &serde_json::Value) -> (u16, serde_json::Value) {
    let mut response = http_agent()
        .post(url)
        .header("Content-Type", "application/json")
        .send(body.to_string())
        .expect("request should send");
    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .read_to_string()
        .expect("body should read");
    (status, serde_json::from_str(&text).expect("body is json"))
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_ok_and_version() {
    let server = MockServer::start().await;
    let (state, _temp) = state_with(&server, Arc::new(Readiness::new())).await;
    let base = serve(state).await;

    let (status, body) =
        tokio::task::spawn_blocking(move || get_json(&format!("{base}/health")))
            .await
            .expect("task should join");

    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reflects_readiness_transitions() {
    let server = MockServer::start().await;
    let readiness = Arc::new(Readiness::new());
    let (state, _temp) = state_with(&server, Arc::clone(&readiness)).await;
    let base = serve(state).await;

    let url = format!("{base}/status");
    let probe = url.clone();
    let (status, body) = tokio::task::spawn_blocking(move || get_json(&probe))
        .await
        .expect("task should join");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "initializing");
    assert!(body.get("error").is_none());

    readiness.set_ready();
    let probe = url.clone();
    let (status, body) = tokio::task::spawn_blocking(move || get_json(&probe))
        .await
        .expect("task should join");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ready");
}

#[tokio::test(flavor = "multi_thread")]
async fn status_surfaces_failure_cause() {
    let server = MockServer::start().await;
    let readiness = Arc::new(Readiness::new());
    readiness.set_failed("knowledge file missing".to_string());
    let (state, _temp) = state_with(&server, readiness).await;
    let base = serve(state).await;

    let (status, body) =
        tokio::task::spawn_blocking(move || get_json(&format!("{base}/status")))
            .await
            .expect("task should join");

    assert_eq!(status, 200);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "knowledge file missing");
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_while_initializing_returns_503() {
    let server = MockServer::start().await;
    let (state, _temp) = state_with(&server, Arc::new(Readiness::new())).await;
    let base = serve(state).await;

    let (status, body) = tokio::task::spawn_blocking(move || {
        post_json(
            &format!("{base}/ask"),
            &serde_json::json!({ "question": "Who is Elizabeth Bennet?" }),
        )
    })
    .await
    .expect("task should join");

    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "initializing");
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_rejects_blank_questions() {
    let server = MockServer::start().await;
    let readiness = Arc::new(Readiness::new());
    readiness.set_ready();
    let (state, _temp) = state_with(&server, readiness).await;
    let base = serve(state).await;

    let (status, body) = tokio::task::spawn_blocking(move || {
        post_json(&format!("{base}/ask"), &serde_json::json!({ "question": "   " }))
    })
    .await
    .expect("task should join");

    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_after_failed_init_reports_index_failure() {
    let server = MockServer::start().await;
    let readiness = Arc::new(Readiness::new());
    readiness.set_failed("knowledge file missing".to_string());
    let (state, _temp) = state_with(&server, readiness).await;
    let base = serve(state).await;

    let (status, body) = tokio::task::spawn_blocking(move || {
        post_json(
            &format!("{base}/ask"),
            &serde_json::json!({ "question": "Who is Elizabeth Bennet?" }),
        )
    })
    .await
    .expect("task should join");

    assert_eq!(status, 500);
    assert_eq!(body["error"]["code"], "index_failed");
    assert!(
        body["error"]["message"]
            .as_str()
            .expect("message is a string")
            .contains("knowledge file missing")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_answers_with_sources_when_ready() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[1.0, 0.0, 0.0, 0.0]]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "Elizabeth Bennet is the novel's protagonist."
        })))
        .mount(&server)
        .await;

    let readiness = Arc::new(Readiness::new());
    readiness.set_ready();
    let (state, _temp) = state_with(&server, readiness).await;

    state
        .engine
        .store()
        .store_chunks_batch(&[ChunkRecord {
            id: "chunk-0".to_string(),
            vector: vec![1.0, 0.0, 0.0, 0.0],
            content: "Elizabeth Bennet is the second of five daughters.".to_string(),
            start_offset: 0,
            chunk_index: 0,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }])
        .await
        .expect("should seed store");

    let base = serve(state).await;

    let (status, body) = tokio::task::spawn_blocking(move || {
        post_json(
            &format!("{base}/ask"),
            &serde_json::json!({ "question": "Who is Elizabeth Bennet?" }),
        )
    })
    .await
    .expect("task should join");

    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Elizabeth Bennet is the novel's protagonist.");
    assert_eq!(
        body["sources"][0]["content"],
        "Elizabeth Bennet is the second of five daughters."
    );
}
