//! MCP Tools Implementation
//!
//! Tool definitions and handlers exposing the memory and flashcard operations.

use crate::config::FlashcardConfig;
use crate::flashcards::{CardGenerator, generate_deck};
use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use crate::memory::MemoryManager;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Most cards a single document may be asked for
pub const MAX_CARDS_PER_DOCUMENT: usize = 50;

/// Decode a tool's arguments into its typed parameter struct
fn parse_arguments<T: DeserializeOwned>(tool: &str, params: CallToolParams) -> McpResult<T> {
    let arguments = Value::Object(params.arguments.unwrap_or_default().into_iter().collect());
    serde_json::from_value(arguments).map_err(|e| McpError::InvalidToolParameters {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Error result for arguments that decode but cannot be acted on
fn invalid_input(tool: &str, message: &str) -> CallToolResult {
    warn!("Rejected {} call: {}", tool, message);
    CallToolResult::text(format!("Error: {}", message), true)
}

/// Learn a block of text under a source name
pub struct LearnDocumentHandler {
    memory: Arc<MemoryManager>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LearnDocumentArgs {
    text: String,
    source: String,
}

impl LearnDocumentHandler {
    pub const NAME: &'static str = "learn_document";

    #[inline]
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Create the learn_document tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: Self::NAME.to_string(),
            description: Some(
                "Memorize a text so it can be searched later. Re-learning a source replaces it."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Full text of the document"
                    },
                    "source": {
                        "type": "string",
                        "description": "Name the document is remembered under, usually its file name"
                    }
                },
                "required": ["text", "source"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for LearnDocumentHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult> {
        let args: LearnDocumentArgs = parse_arguments(Self::NAME, params)?;
        if args.source.trim().is_empty() {
            return Ok(invalid_input(Self::NAME, "source must not be empty"));
        }

        debug!("Learning document '{}' ({} bytes)", args.source, args.text.len());
        let outcome = self.memory.learn(&args.text, &args.source).await;
        Ok(CallToolResult::text(outcome.to_string(), outcome.is_error()))
    }
}

/// Learn one file from disk
pub struct LearnFileHandler {
    memory: Arc<MemoryManager>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LearnFileArgs {
    path: PathBuf,
}

impl LearnFileHandler {
    pub const NAME: &'static str = "learn_file";

    #[inline]
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Create the learn_file tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: Self::NAME.to_string(),
            description: Some("Read a PDF or text file and memorize its content".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the file to learn"
                    }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for LearnFileHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult> {
        let args: LearnFileArgs = parse_arguments(Self::NAME, params)?;

        let outcome = self.memory.learn_file(&args.path).await;
        Ok(CallToolResult::text(outcome.to_string(), outcome.is_error()))
    }
}

/// Learn several files, one after another
pub struct LearnFilesHandler {
    memory: Arc<MemoryManager>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LearnFilesArgs {
    paths: Vec<PathBuf>,
}

impl LearnFilesHandler {
    pub const NAME: &'static str = "learn_files";

    #[inline]
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Create the learn_files tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: Self::NAME.to_string(),
            description: Some(
                "Read and memorize several PDF or text files, one at a time".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Paths of the files to learn"
                    }
                },
                "required": ["paths"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for LearnFilesHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult> {
        let args: LearnFilesArgs = parse_arguments(Self::NAME, params)?;
        if args.paths.is_empty() {
            return Ok(invalid_input(Self::NAME, "paths must not be empty"));
        }

        let report = self.memory.learn_files(&args.paths).await;
        Ok(CallToolResult::text(report.to_string(), report.is_error()))
    }
}

/// Search memory for context relevant to a question
pub struct AskMemoryHandler {
    memory: Arc<MemoryManager>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AskMemoryArgs {
    question: String,
}

impl AskMemoryHandler {
    pub const NAME: &'static str = "ask_memory";

    #[inline]
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Create the ask_memory tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: Self::NAME.to_string(),
            description: Some(
                "Find the passages of studied documents most relevant to a question".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Question to look up in the studied documents"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for AskMemoryHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult> {
        let args: AskMemoryArgs = parse_arguments(Self::NAME, params)?;

        debug!("Answering question: '{}'", args.question);
        let outcome = self.memory.answer(&args.question).await;
        Ok(CallToolResult::text(outcome.to_string(), outcome.is_error()))
    }
}

/// List the documents currently in memory
pub struct ListSourcesHandler {
    memory: Arc<MemoryManager>,
}

impl ListSourcesHandler {
    pub const NAME: &'static str = "list_sources";

    #[inline]
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Create the list_sources tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: Self::NAME.to_string(),
            description: Some("List the documents that have been studied".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for ListSourcesHandler {
    #[inline]
    async fn handle(&self, _params: CallToolParams) -> McpResult<CallToolResult> {
        debug!("Listing studied sources");

        let listing = self.memory.list_sources().await;
        Ok(CallToolResult::text(listing.to_string(), listing.is_error()))
    }
}

/// Build a flashcard deck from documents
pub struct GenerateFlashcardsHandler {
    generator: Arc<dyn CardGenerator>,
    config: FlashcardConfig,
    default_output: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenerateFlashcardsArgs {
    paths: Vec<PathBuf>,
    count: usize,
    #[serde(default)]
    output: Option<PathBuf>,
}

impl GenerateFlashcardsHandler {
    pub const NAME: &'static str = "generate_flashcards";

    #[inline]
    pub fn new(
        generator: Arc<dyn CardGenerator>,
        config: FlashcardConfig,
        default_output: PathBuf,
    ) -> Self {
        Self {
            generator,
            config,
            default_output,
        }
    }

    /// Create the generate_flashcards tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: Self::NAME.to_string(),
            description: Some(
                "Create exam-review flashcards from documents and save them as an Anki-importable deck"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Paths of the documents to make cards from"
                    },
                    "count": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_CARDS_PER_DOCUMENT,
                        "description": "Number of cards to create per document"
                    },
                    "output": {
                        "type": "string",
                        "description": "Optional: where to write the deck"
                    }
                },
                "required": ["paths", "count"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for GenerateFlashcardsHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult> {
        let args: GenerateFlashcardsArgs = parse_arguments(Self::NAME, params)?;
        if args.paths.is_empty() {
            return Ok(invalid_input(Self::NAME, "paths must not be empty"));
        }
        if !(1..=MAX_CARDS_PER_DOCUMENT).contains(&args.count) {
            let message = format!("count must be between 1 and {}", MAX_CARDS_PER_DOCUMENT);
            return Ok(invalid_input(Self::NAME, &message));
        }

        let output = args.output.unwrap_or_else(|| self.default_output.clone());
        match generate_deck(
            self.generator.as_ref(),
            &args.paths,
            args.count,
            &output,
            &self.config,
        )
        .await
        {
            Ok(report) => Ok(CallToolResult::text(report.to_string(), report.is_error())),
            Err(e) => {
                error!("Failed to write flashcard deck: {}", e);
                Ok(CallToolResult::text(
                    format!("Error writing the deck: {}", e),
                    true,
                ))
            }
        }
    }
}

/// Register every study tool with `server`
#[inline]
pub async fn register_study_tools(
    server: &McpServer,
    memory: &Arc<MemoryManager>,
    generator: Arc<dyn CardGenerator>,
    flashcards: FlashcardConfig,
    default_deck_path: PathBuf,
) {
    server
        .register_tool(
            LearnDocumentHandler::tool_definition(),
            LearnDocumentHandler::new(Arc::clone(memory)),
        )
        .await;
    server
        .register_tool(
            LearnFileHandler::tool_definition(),
            LearnFileHandler::new(Arc::clone(memory)),
        )
        .await;
    server
        .register_tool(
            LearnFilesHandler::tool_definition(),
            LearnFilesHandler::new(Arc::clone(memory)),
        )
        .await;
    server
        .register_tool(
            AskMemoryHandler::tool_definition(),
            AskMemoryHandler::new(Arc::clone(memory)),
        )
        .await;
    server
        .register_tool(
            ListSourcesHandler::tool_definition(),
            ListSourcesHandler::new(Arc::clone(memory)),
        )
        .await;
    server
        .register_tool(
            GenerateFlashcardsHandler::tool_definition(),
            GenerateFlashcardsHandler::new(generator, flashcards, default_deck_path),
        )
        .await;
}
