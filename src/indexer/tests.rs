use super::*;
use crate::config::OllamaConfig;
use crate::engine::ReadinessState;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const DIM: usize = 4;

fn embed_responder(request: &Request) -> ResponseTemplate {
    let body: serde_json::Value =
        serde_json::from_slice(&request.body).expect("embed request body is json");
    let count = body["input"].as_array().map_or(0, Vec::len);
    let embeddings: Vec<Vec<f32>> = (0..count).map(|i| vec![i as f32; DIM]).collect();
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embeddings": embeddings }))
}

async fn mock_embed_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(embed_responder)
        .mount(server)
        .await;
}

fn test_config(temp_dir: &TempDir, server: &MockServer, document: &str) -> crate::config::Config {
    let document_path = temp_dir.path().join("knowledgebase.txt");
    std::fs::write(&document_path, document).expect("should write document");

    let uri = url::Url::parse(&server.uri()).expect("uri should parse");
    let mut config = crate::config::Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..crate::config::Config::default()
    };
    config.document.path = document_path;
    config.chunking.max_length = 50;
    config.chunking.overlap = 10;
    config.ollama = OllamaConfig {
        host: uri.host_str().expect("host").to_string(),
        port: uri.port().expect("port"),
        batch_size: 2,
        embedding_dimension: DIM as u32,
        ..OllamaConfig::default()
    };
    config
}

async fn store_and_client(
    config: &crate::config::Config,
) -> (VectorStore, OllamaClient) {
    let store = VectorStore::new(&config.vectors_path(), DIM)
        .await
        .expect("should create store");
    let client = OllamaClient::new(&config.ollama)
        .expect("should create client")
        .with_retry_attempts(1);
    (store, client)
}

#[test]
fn fingerprint_tracks_document_and_parameters() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = crate::config::Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..crate::config::Config::default()
    };

    let base = index_fingerprint("some document", &config);
    assert_eq!(base, index_fingerprint("some document", &config));
    assert_ne!(base, index_fingerprint("another document", &config));

    config.chunking.max_length += 1;
    assert_ne!(base, index_fingerprint("some document", &config));
    config.chunking.max_length -= 1;

    config.ollama.embed_model = "other-model:latest".to_string();
    assert_ne!(base, index_fingerprint("some document", &config));
}

#[tokio::test(flavor = "multi_thread")]
async fn build_index_chunks_embeds_and_persists() {
    let server = MockServer::start().await;
    mock_embed_endpoint(&server).await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    // 120 chars with max_length 50 / overlap 10 yields chunks at 0, 40, 80.
    let config = test_config(&temp_dir, &server, &"x".repeat(120));
    let (store, client) = store_and_client(&config).await;

    let stats = build_index(&config, &store, &client, false)
        .await
        .expect("build should succeed");

    assert_eq!(stats.chunk_count, 3);
    assert!(!stats.reused);
    assert_eq!(store.count_chunks().await.expect("count"), 3);

    let manifest =
        load_manifest(&config.manifest_path()).expect("manifest should be written");
    assert_eq!(manifest.chunk_count, 3);
    assert_eq!(manifest.embed_model, config.ollama.embed_model);
}

#[tokio::test(flavor = "multi_thread")]
async fn rebuild_with_unchanged_inputs_skips_embedding() {
    let server = MockServer::start().await;
    mock_embed_endpoint(&server).await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir, &server, &"x".repeat(120));
    let (store, client) = store_and_client(&config).await;

    build_index(&config, &store, &client, false)
        .await
        .expect("first build should succeed");

    // Point a fresh client at a server that rejects every call. The cached
    // index must be reused without touching the network.
    let silent = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&silent)
        .await;

    let silent_uri = url::Url::parse(&silent.uri()).expect("uri should parse");
    let mut offline_config = config.clone();
    offline_config.ollama.host = silent_uri.host_str().expect("host").to_string();
    offline_config.ollama.port = silent_uri.port().expect("port");
    let offline_client = OllamaClient::new(&offline_config.ollama)
        .expect("should create client")
        .with_retry_attempts(1);

    let stats = build_index(&offline_config, &store, &offline_client, false)
        .await
        .expect("cached build should succeed");

    assert_eq!(stats.chunk_count, 3);
    assert!(stats.reused);
    silent.verify().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_document_invalidates_cached_index() {
    let server = MockServer::start().await;
    mock_embed_endpoint(&server).await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir, &server, &"x".repeat(120));
    let (store, client) = store_and_client(&config).await;

    build_index(&config, &store, &client, false)
        .await
        .expect("first build should succeed");

    // Grow the document: 200 chars yields chunks at 0, 40, 80, 120, 160.
    std::fs::write(&config.document.path, "y".repeat(200)).expect("should rewrite document");

    let stats = build_index(&config, &store, &client, false)
        .await
        .expect("rebuild should succeed");

    assert_eq!(stats.chunk_count, 5);
    assert!(!stats.reused);
    assert_eq!(store.count_chunks().await.expect("count"), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_document_fails_the_build() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&temp_dir, &server, "placeholder");
    config.document.path = temp_dir.path().join("does-not-exist.txt");
    let (store, client) = store_and_client(&config).await;

    let result = build_index(&config, &store, &client, false).await;

    match result {
        Err(LibrettoError::IndexBuild(msg)) => {
            assert!(msg.contains("does-not-exist.txt"), "unexpected message: {msg}");
        }
        other => panic!("expected IndexBuild error, got {:?}", other.map(|s| s.chunk_count)),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_document_fails_the_build() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir, &server, "");
    let (store, client) = store_and_client(&config).await;

    let result = build_index(&config, &store, &client, false).await;

    assert!(matches!(result, Err(LibrettoError::IndexBuild(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_flips_readiness_to_ready() {
    let server = MockServer::start().await;
    mock_embed_endpoint(&server).await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&temp_dir, &server, &"x".repeat(120));
    let (store, client) = store_and_client(&config).await;
    let readiness = Arc::new(Readiness::new());

    initialize(
        config,
        Arc::new(store),
        Arc::new(client),
        Arc::clone(&readiness),
    )
    .await;

    assert_eq!(readiness.state(), ReadinessState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_records_failure_cause() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&temp_dir, &server, "placeholder");
    config.document.path = temp_dir.path().join("gone.txt");
    let (store, client) = store_and_client(&config).await;
    let readiness = Arc::new(Readiness::new());

    initialize(
        config,
        Arc::new(store),
        Arc::new(client),
        Arc::clone(&readiness),
    )
    .await;

    assert_eq!(readiness.state(), ReadinessState::Failed);
    let cause = readiness.failure_cause().expect("failure cause recorded");
    assert!(cause.contains("gone.txt"), "unexpected cause: {cause}");
}
