use super::*;
use crate::config::{EmbeddingConfig, OllamaConfig};

fn test_config() -> Config {
    Config {
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: "test-host".to_string(),
            port: 1234,
            model: "test-model".to_string(),
            generation_model: "test-writer".to_string(),
            ..OllamaConfig::default()
        },
        embedding: EmbeddingConfig {
            retry_attempts: 4,
            retry_base_delay_ms: 10,
            ..EmbeddingConfig::default()
        },
        ..Config::default()
    }
}

#[test]
fn client_configuration() {
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.generation_model, "test-writer");
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    // Note: timeout is part of the agent configuration
    assert_eq!(client.retry_attempts, 4);
    assert_eq!(client.retry_base_delay, Duration::from_millis(10));
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&Config::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5)
        .with_retry_base_delay(Duration::from_millis(1));

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.retry_base_delay, Duration::from_millis(1));
}

#[test]
fn zero_retry_attempts_still_tries_once() {
    let client = OllamaClient::new(&Config::default())
        .expect("Failed to create client")
        .with_retry_attempts(0);

    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn task_prefixes_are_applied() {
    let client = OllamaClient::new(&Config::default()).expect("Failed to create client");

    assert_eq!(
        client.task_input("cell biology", EmbedTask::Document),
        "search_document: cell biology"
    );
    assert_eq!(
        client.task_input("what is a ribosome?", EmbedTask::Query),
        "search_query: what is a ribosome?"
    );
}

#[test]
fn empty_prefixes_pass_text_through() {
    let mut config = Config::default();
    config.embedding.document_prefix = String::new();
    config.embedding.query_prefix = String::new();
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.task_input("plain", EmbedTask::Document), "plain");
    assert_eq!(client.task_input("plain", EmbedTask::Query), "plain");
}

#[test]
fn embed_request_serialization() {
    let request = EmbedRequest {
        model: "nomic-embed-text",
        input: "search_document: hello".to_string(),
    };

    let json = serde_json::to_value(&request).expect("should serialize");
    assert_eq!(json["model"], "nomic-embed-text");
    assert_eq!(json["input"], "search_document: hello");
}

#[test]
fn generate_request_serialization() {
    let request = GenerateRequest {
        model: "llama3.2",
        prompt: "make cards",
        stream: false,
        format: "json",
    };

    let json = serde_json::to_value(&request).expect("should serialize");
    assert_eq!(json["stream"], false);
    assert_eq!(json["format"], "json");
}
