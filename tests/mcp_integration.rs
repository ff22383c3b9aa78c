#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! MCP Server Integration Tests
//!
//! Drives a complete study session through the JSON-RPC interface, backed by
//! the on-disk vector store.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use study_mcp::Result;
use study_mcp::config::{Config, FlashcardConfig};
use study_mcp::database::{LanceVectorStore, VectorStore};
use study_mcp::embeddings::{EmbedTask, Embedder};
use study_mcp::flashcards::CardGenerator;
use study_mcp::mcp::protocol::{CallToolParams, ToolContent};
use study_mcp::mcp::server::ConnectionState;
use study_mcp::mcp::tools::AskMemoryHandler;
use study_mcp::mcp::{McpServer, ToolHandler, register_study_tools};
use study_mcp::memory::MemoryManager;
use tempfile::TempDir;

/// Embeds by counting a handful of vowels
struct VowelEmbedder;

#[async_trait]
impl Embedder for VowelEmbedder {
    async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(['a', 'e', 'i', 'o', 'u']
            .iter()
            .map(|v| lower.chars().filter(|c| c == v).count() as f32)
            .collect())
    }
}

struct QuizWriter;

#[async_trait]
impl CardGenerator for QuizWriter {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(r#"[{"question": "Who wrote Hamlet?", "answer": "Shakespeare"},
               {"question": "In which century?", "answer": "17th"}]"#
            .to_string())
    }
}

/// Test helper building a server over a store in a temporary directory
async fn setup_test_environment() -> (TempDir, Arc<McpServer>, Arc<MemoryManager>) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = Config {
        base_dir: Some(temp_dir.path().to_path_buf()),
        ..Config::default()
    };

    let store = Arc::new(
        LanceVectorStore::new(&config)
            .await
            .expect("Failed to create vector store"),
    );
    let memory = Arc::new(MemoryManager::new(
        config.memory.clone(),
        Arc::new(VowelEmbedder),
        store as Arc<dyn VectorStore>,
    ));

    let server = McpServer::new("study-mcp".to_string(), "1.0.0".to_string());
    register_study_tools(
        &server,
        &memory,
        Arc::new(QuizWriter),
        FlashcardConfig {
            min_input_chars: 10,
            ..FlashcardConfig::default()
        },
        temp_dir.path().join("default-deck.txt"),
    )
    .await;

    (temp_dir, Arc::new(server), memory)
}

fn request(id: u64, method: &str, params: Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }).to_string()
}

fn call(id: u64, tool: &str, arguments: Value) -> String {
    request(id, "tools/call", json!({ "name": tool, "arguments": arguments }))
}

async fn run_session(server: Arc<McpServer>, lines: &[String]) -> Vec<Value> {
    let input = lines.join("\n") + "\n";
    let mut output = Vec::new();
    server
        .serve(input.as_bytes(), &mut output)
        .await
        .expect("server should run to EOF");

    String::from_utf8(output)
        .expect("output should be UTF-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect()
}

fn tool_text(response: &Value) -> &str {
    response["result"]["content"][0]["text"]
        .as_str()
        .expect("tool result should carry text")
}

/// Test MCP server creation and basic initialization
#[tokio::test]
async fn mcp_server_initialization() {
    let (_temp_dir, server, _memory) = setup_test_environment().await;

    assert_eq!(server.server_info.name, "study-mcp");
    assert_eq!(server.server_info.version, "1.0.0");
    assert_eq!(server.tools.read().await.len(), 6);
    assert_eq!(
        server.connection_state().await,
        ConnectionState::Uninitialized
    );
}

/// A full study session: learn, ask, list, make flashcards
#[tokio::test]
async fn complete_study_session() {
    let (temp_dir, server, _memory) = setup_test_environment().await;

    let notes = temp_dir.path().join("literature.txt");
    std::fs::write(
        &notes,
        "Hamlet is a tragedy written by William Shakespeare around 1600.",
    )
    .expect("should write notes");
    let deck = temp_dir.path().join("decks").join("literature.txt");

    let lines = vec![
        request(
            1,
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "integration", "version": "1" }
            }),
        ),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string(),
        call(2, "learn_file", json!({ "path": notes })),
        call(
            3,
            "learn_document",
            json!({ "text": "Quantum physics studies tiny particles.", "source": "physics" }),
        ),
        call(4, "ask_memory", json!({ "question": "Who wrote the tragedy Hamlet?" })),
        call(5, "list_sources", json!({})),
        call(
            6,
            "generate_flashcards",
            json!({ "paths": [notes], "count": 2, "output": deck }),
        ),
    ];

    let responses = run_session(Arc::clone(&server), &lines).await;

    assert_eq!(responses.len(), 6);
    assert_eq!(responses[0]["result"]["protocolVersion"], "2025-06-18");

    assert_eq!(
        tool_text(&responses[1]),
        "Memorized 1 fragments from literature.txt."
    );
    assert_eq!(responses[1]["result"]["isError"], false);
    assert_eq!(tool_text(&responses[2]), "Memorized 1 fragments from physics.");

    let answer = tool_text(&responses[3]);
    assert!(answer.starts_with("Information found in ("));
    assert!(answer.contains("literature.txt"));
    assert!(answer.contains("Hamlet is a tragedy"));

    assert_eq!(
        tool_text(&responses[4]),
        "Studied files: literature.txt, physics"
    );

    assert!(tool_text(&responses[5]).starts_with("Created 2 flashcards from 1 documents"));
    let written = std::fs::read_to_string(&deck).expect("deck should be written");
    assert!(written.contains("Who wrote Hamlet?\tShakespeare\n"));

    assert_eq!(server.connection_state().await, ConnectionState::Closed);
}

/// Tool failures are reported in the result, not as protocol errors
#[tokio::test]
async fn tool_failures_are_results() {
    let (temp_dir, server, _memory) = setup_test_environment().await;
    let missing = temp_dir.path().join("missing.pdf");

    let lines = vec![
        call(1, "learn_file", json!({ "path": missing })),
        call(2, "ask_memory", json!({ "question": "anything?" })),
        call(3, "learn_files", json!({ "paths": [] })),
    ];

    let responses = run_session(server, &lines).await;

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["result"]["isError"], true);
    assert!(tool_text(&responses[0]).starts_with("Error: could not memorize missing.pdf"));
    assert_eq!(
        tool_text(&responses[1]),
        "No relevant information found in the notes."
    );
    assert_eq!(responses[1]["result"]["isError"], false);
    assert_eq!(responses[2]["result"]["isError"], true);
    assert_eq!(tool_text(&responses[2]), "Error: paths must not be empty");
}

/// Handlers can be driven directly without the transport
#[tokio::test]
async fn ask_handler_direct_call() {
    let (_temp_dir, _server, memory) = setup_test_environment().await;
    memory
        .learn("Aeiou vowels everywhere in this sentence.", "vowels.txt")
        .await;

    let handler = AskMemoryHandler::new(Arc::clone(&memory));
    let mut arguments = HashMap::new();
    arguments.insert("question".to_string(), json!("vowels?"));
    let params = CallToolParams {
        name: AskMemoryHandler::NAME.to_string(),
        arguments: Some(arguments),
    };

    let result = handler.handle(params).await.expect("Tool execution failed");

    assert_eq!(result.is_error, Some(false));
    assert_eq!(result.content.len(), 1);
    let ToolContent::Text { text } = &result.content[0];
    assert!(text.contains("vowels.txt"));
}
