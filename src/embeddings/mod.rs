// Embeddings module
// Ollama integration and fixed-width text chunking

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use chunking::{chunk_id, chunk_text};
pub use ollama::OllamaClient;

/// What an embedding will be used for.
///
/// Some embedding models produce different vectors for the same text depending
/// on whether it is being indexed or searched for, so callers must pass
/// `Document` when storing and `Query` when searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedTask {
    Document,
    Query,
}

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Any failure is reported as `StudyError::Embedding`.
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>>;
}
