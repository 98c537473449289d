#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! HTTP behavior of the Ollama clients against a mocked server.

use semdex::config::OllamaConfig;
use semdex::embeddings::Embedder;
use semdex::embeddings::ollama::OllamaEmbedder;
use semdex::generation::GenerationClient;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, embedding_dimension: u32) -> OllamaConfig {
    let uri = url::Url::parse(&server.uri()).expect("mock server uri should parse");
    OllamaConfig {
        protocol: "http".to_string(),
        host: uri.host_str().expect("mock server has a host").to_string(),
        port: uri.port().expect("mock server has a port"),
        embedding_dimension,
        ..OllamaConfig::default()
    }
}

fn unreachable_config() -> OllamaConfig {
    // Reserved port with nothing listening.
    OllamaConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..OllamaConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn tags_probe_reports_reachable_server_and_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                {"name": "all-minilm:latest", "size": 45960996u64},
                {"name": "llama3.2:latest", "size": 2019393189u64}
            ]
        })))
        .mount(&server)
        .await;

    let client =
        GenerationClient::new(&config_for(&server, 384)).expect("should build client");

    assert!(client.check_connection());
    assert_eq!(
        client.list_models(),
        vec!["all-minilm:latest".to_string(), "llama3.2:latest".to_string()]
    );
    assert!(client.has_model("llama3.2:latest"));
    assert!(client.has_model("llama3.2"));
    assert!(!client.has_model("mistral"));
}

#[tokio::test(flavor = "multi_thread")]
async fn probes_fail_soft_when_server_is_unreachable() {
    let client = GenerationClient::new(&unreachable_config()).expect("should build client");

    assert!(!client.check_connection());
    assert!(client.list_models().is_empty());
    assert!(!client.has_model("llama3.2:latest"));
}

#[tokio::test(flavor = "multi_thread")]
async fn embedder_rejects_wrong_dimensionality() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embedding": [0.1, 0.2, 0.3, 0.4]
        })))
        .mount(&server)
        .await;

    let embedder =
        OllamaEmbedder::new(&config_for(&server, 64)).expect("should build embedder");
    let result = embedder.embed("some text");
    assert!(result.is_err(), "mock returns 4 dims but config says 64");
}

#[tokio::test(flavor = "multi_thread")]
async fn embedder_returns_model_vector() {
    let server = MockServer::start().await;
    let vector: Vec<f32> = (0..64).map(|i| i as f32 * 0.01).collect();
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embedding": vector
        })))
        .mount(&server)
        .await;

    let embedder =
        OllamaEmbedder::new(&config_for(&server, 64)).expect("should build embedder");
    let embedding = embedder.embed("some text").expect("should embed");
    assert_eq!(embedding.len(), 64);
}

#[tokio::test(flavor = "multi_thread")]
async fn embedder_retries_transient_server_errors() {
    let server = MockServer::start().await;
    let vector: Vec<f32> = vec![0.5; 64];

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embedding": vector
        })))
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&config_for(&server, 64))
        .expect("should build embedder")
        .with_timeout(Duration::from_secs(5))
        .with_retry_attempts(2);

    let embedding = embedder.embed("retry me").expect("should embed after retry");
    assert_eq!(embedding.len(), 64);
}

#[tokio::test(flavor = "multi_thread")]
async fn generation_streams_fragments_in_order() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"model\":\"m\",\"response\":\"Hello\",\"done\":false}\n",
        "{\"model\":\"m\",\"response\":\", \",\"done\":false}\n",
        "{\"model\":\"m\",\"response\":\"world\",\"done\":false}\n",
        "{\"model\":\"m\",\"response\":\"\",\"done\":true,\"total_duration\":5589157167}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let client =
        GenerationClient::new(&config_for(&server, 384)).expect("should build client");

    let fragments: Vec<String> = client
        .generate_stream("say hello")
        .expect("stream should start")
        .collect::<Result<Vec<String>, _>>()
        .expect("all fragments should decode");

    assert_eq!(fragments, vec!["Hello", ", ", "world"]);

    let full = client.generate_full("say hello").expect("should generate");
    assert_eq!(full, "Hello, world");
}

#[tokio::test(flavor = "multi_thread")]
async fn generation_errors_loudly_with_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_raw(r#"{"error":"model 'missing' not found"}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let client =
        GenerationClient::new(&config_for(&server, 384)).expect("should build client");

    let error = client
        .generate_stream("anything")
        .expect_err("missing model must fail");
    let message = error.to_string();
    assert!(message.contains("404"), "status in message: {message}");
    assert!(
        message.contains("model 'missing' not found"),
        "body in message: {message}"
    );
}
