// Memory manager
// Learns documents into the vector store and answers questions from it

#[cfg(test)]
mod tests;

use chrono::Utc;
use futures::{StreamExt, stream};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::MemoryConfig;
use crate::database::{ChunkMetadata, StoredChunk, VectorStore};
use crate::documents::{read_document, source_name};
use crate::embeddings::{EmbedTask, Embedder, chunk_id, chunk_text};

/// Separator placed between retrieved chunks in an answer's context
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Result of learning one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    /// The document had no text to learn
    NothingToStore,
    /// `stored` of `attempted` chunks made it into the store
    Stored {
        source: String,
        stored: usize,
        attempted: usize,
    },
    /// The document could not be stored; earlier chunks of the source are kept
    /// unless only their removal failed
    Failed { source: String, reason: String },
}

impl LearnOutcome {
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Some, but not all, chunks were stored
    #[inline]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Stored { stored, attempted, .. } if *stored < *attempted)
    }
}

impl fmt::Display for LearnOutcome {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToStore => write!(f, "Nothing to memorize: the document has no text."),
            Self::Stored {
                source,
                stored,
                attempted,
            } if stored < attempted => write!(
                f,
                "Memorized {stored} of {attempted} fragments from {source}. {} could not be embedded.",
                attempted - stored
            ),
            Self::Stored { source, stored, .. } => {
                write!(f, "Memorized {stored} fragments from {source}.")
            }
            Self::Failed { source, reason } => {
                write!(f, "Error: could not memorize {source}: {reason}")
            }
        }
    }
}

/// Result of learning several documents in turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub learned: usize,
    pub total: usize,
    pub outcomes: Vec<(PathBuf, LearnOutcome)>,
}

impl BatchReport {
    /// True when no document in the batch was learned
    #[inline]
    pub const fn is_error(&self) -> bool {
        self.total > 0 && self.learned == 0
    }
}

impl fmt::Display for BatchReport {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, outcome) in &self.outcomes {
            writeln!(f, "{}: {}", path.display(), outcome)?;
        }
        write!(
            f,
            "Finished. Memorized {} of {} documents.",
            self.learned, self.total
        )
    }
}

/// Result of answering a question from memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Found {
        sources: BTreeSet<String>,
        context: String,
    },
    NoRelevantInformation,
    /// The question was empty or could not be embedded
    QuestionNotProcessed,
    StorageFailed(String),
}

impl AnswerOutcome {
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::QuestionNotProcessed | Self::StorageFailed(_))
    }
}

impl fmt::Display for AnswerOutcome {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found { sources, context } => {
                let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
                write!(
                    f,
                    "Information found in ({}):\n{}",
                    sources.join(", "),
                    context
                )
            }
            Self::NoRelevantInformation => {
                write!(f, "No relevant information found in the notes.")
            }
            Self::QuestionNotProcessed => write!(f, "Error processing the question."),
            Self::StorageFailed(reason) => write!(f, "Error reading memory: {reason}"),
        }
    }
}

/// The distinct sources currently in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceListing {
    Empty,
    Sources(BTreeSet<String>),
    Unavailable(String),
}

impl SourceListing {
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl fmt::Display for SourceListing {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Memory is empty."),
            Self::Sources(sources) => {
                let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
                write!(f, "Studied files: {}", sources.join(", "))
            }
            Self::Unavailable(reason) => write!(f, "Error reading memory: {reason}"),
        }
    }
}

/// Runs chunking, embedding and storage together
pub struct MemoryManager {
    config: MemoryConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl MemoryManager {
    #[inline]
    pub fn new(
        config: MemoryConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            config,
            embedder,
            store,
        }
    }

    #[inline]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Chunk, embed and store `text` under `source`.
    ///
    /// New chunks are stored first; only then are the source's other chunks
    /// removed. If embedding or storing fails, prior chunks are left untouched.
    #[inline]
    pub async fn learn(&self, text: &str, source: &str) -> LearnOutcome {
        if text.trim().is_empty() {
            debug!("Nothing to learn from empty document {}", source);
            return LearnOutcome::NothingToStore;
        }

        let chunks = chunk_text(text, self.config.chunk_size);
        let attempted = chunks.len();
        info!("Learning {} chunks from {}", attempted, source);

        let created_at = Utc::now().to_rfc3339();
        let embedder = &self.embedder;

        // `buffered` keeps results in chunk order
        let pending: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, content)| async move {
                let result = embedder.embed(content, EmbedTask::Document).await;
                (index, content, result)
            })
            .collect();
        let embedded: Vec<_> = stream::iter(pending)
            .buffered(self.config.embed_concurrency.max(1))
            .collect()
            .await;

        let stored_chunks: Vec<StoredChunk> = embedded
            .into_iter()
            .filter_map(|(index, content, result)| {
                let vector = match result {
                    Ok(vector) => vector,
                    Err(e) => {
                        warn!("Skipping chunk {} of {}: {}", index, source, e);
                        return None;
                    }
                };
                let Some(chunk_index) = chunk_index(index) else {
                    warn!("Skipping chunk {} of {}: index out of range", index, source);
                    return None;
                };
                Some(StoredChunk {
                    id: chunk_id(source, index),
                    vector,
                    content: content.to_string(),
                    metadata: ChunkMetadata {
                        source: source.to_string(),
                        chunk_index,
                        created_at: created_at.clone(),
                    },
                })
            })
            .collect();

        let stored = stored_chunks.len();
        if stored == 0 {
            error!("No chunk of {} could be embedded", source);
            return LearnOutcome::Failed {
                source: source.to_string(),
                reason: "no embedding could be generated".to_string(),
            };
        }

        let kept: Vec<String> = stored_chunks.iter().map(|c| c.id.clone()).collect();

        // Old chunks stay until the new ones are safely stored
        if let Err(e) = self.store.upsert(stored_chunks).await {
            error!("Failed to store chunks of {}: {}", source, e);
            return LearnOutcome::Failed {
                source: source.to_string(),
                reason: e.to_string(),
            };
        }

        if let Err(e) = self.store.delete_stale(source, &kept).await {
            error!("Failed to remove stale chunks of {}: {}", source, e);
            return LearnOutcome::Failed {
                source: source.to_string(),
                reason: format!("stored new chunks but could not remove old ones: {e}"),
            };
        }

        info!("Stored {}/{} chunks from {}", stored, attempted, source);
        LearnOutcome::Stored {
            source: source.to_string(),
            stored,
            attempted,
        }
    }

    /// Read a file and learn it under its file name
    #[inline]
    pub async fn learn_file(&self, path: &Path) -> LearnOutcome {
        let source = source_name(path);
        let owned = path.to_path_buf();

        let text = match tokio::task::spawn_blocking(move || read_document(&owned)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return LearnOutcome::Failed {
                    source,
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                error!("Document reader task failed for {}: {}", path.display(), e);
                return LearnOutcome::Failed {
                    source,
                    reason: format!("reader task failed: {e}"),
                };
            }
        };

        self.learn(&text, &source).await
    }

    /// Learn each file in turn
    #[inline]
    pub async fn learn_files(&self, paths: &[PathBuf]) -> BatchReport {
        self.learn_files_with(paths, |_, _| {}).await
    }

    /// Learn each file in turn, calling `on_learned` after every document
    #[inline]
    pub async fn learn_files_with<F>(&self, paths: &[PathBuf], mut on_learned: F) -> BatchReport
    where
        F: FnMut(&Path, &LearnOutcome) + Send,
    {
        let mut outcomes = Vec::with_capacity(paths.len());
        let mut learned = 0;

        for path in paths {
            let outcome = self.learn_file(path).await;
            if matches!(outcome, LearnOutcome::Stored { .. }) {
                learned += 1;
            }
            on_learned(path, &outcome);
            outcomes.push((path.clone(), outcome));
        }

        info!("Learned {} of {} documents", learned, paths.len());
        BatchReport {
            learned,
            total: paths.len(),
            outcomes,
        }
    }

    /// Retrieve the chunks closest to `question`
    #[inline]
    pub async fn answer(&self, question: &str) -> AnswerOutcome {
        if question.trim().is_empty() {
            debug!("Refusing to answer an empty question");
            return AnswerOutcome::QuestionNotProcessed;
        }

        let vector = match self.embedder.embed(question, EmbedTask::Query).await {
            Ok(vector) if !vector.is_empty() => vector,
            Ok(_) => {
                warn!("Question embedding came back empty");
                return AnswerOutcome::QuestionNotProcessed;
            }
            Err(e) => {
                warn!("Failed to embed question: {}", e);
                return AnswerOutcome::QuestionNotProcessed;
            }
        };

        let matches = match self.store.query(&vector, self.config.top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                error!("Memory query failed: {}", e);
                return AnswerOutcome::StorageFailed(e.to_string());
            }
        };

        if matches.is_empty() {
            debug!("No chunks matched the question");
            return AnswerOutcome::NoRelevantInformation;
        }

        debug!("Answering from {} chunks", matches.len());
        let sources = matches
            .iter()
            .map(|m| m.metadata.source.clone())
            .collect();
        let context = matches
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        AnswerOutcome::Found { sources, context }
    }

    /// Every distinct source currently stored
    #[inline]
    pub async fn list_sources(&self) -> SourceListing {
        match self.store.list_all_metadata().await {
            Ok(metadata) => {
                let sources: BTreeSet<String> =
                    metadata.into_iter().map(|m| m.source).collect();
                if sources.is_empty() {
                    SourceListing::Empty
                } else {
                    SourceListing::Sources(sources)
                }
            }
            Err(e) => {
                error!("Failed to list sources: {}", e);
                SourceListing::Unavailable(e.to_string())
            }
        }
    }
}

/// Stored form of a chunk position, `None` if it does not fit
fn chunk_index(index: usize) -> Option<u32> {
    u32::try_from(index).ok()
}
