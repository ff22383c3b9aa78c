// In-process vector store
// Keeps chunks in a map and answers queries by exhaustive search


use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ChunkMetadata, QueryMatch, StoredChunk, VectorStore, squared_l2};
use crate::{Result, StudyError};

/// Vector store that lives only as long as the process.
///
/// Queries scan every chunk, which is fine for tests and short sessions.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<BTreeMap<String, StoredChunk>>,
}

impl InMemoryVectorStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every stored chunk, in order
    #[inline]
    pub async fn ids(&self) -> Vec<String> {
        self.chunks.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    #[inline]
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<()> {
        if chunks.is_empty() {
            debug!("No chunks to store");
            return Ok(());
        }

        let mut stored = self.chunks.write().await;

        // Every vector in a collection shares one dimension
        let expected_dim = stored
            .values()
            .next()
            .map(|c| c.vector.len())
            .or_else(|| chunks.first().map(|c| c.vector.len()));
        if let Some(dim) = expected_dim {
            if let Some(bad) = chunks.iter().find(|c| c.vector.len() != dim) {
                return Err(StudyError::Database(format!(
                    "Vector dimension mismatch for {}: expected {}, got {}",
                    bad.id,
                    dim,
                    bad.vector.len()
                )));
            }
        }

        let count = chunks.len();
        for chunk in chunks {
            stored.insert(chunk.id.clone(), chunk);
        }

        debug!("Stored {} chunks in memory", count);
        Ok(())
    }

    #[inline]
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>> {
        let stored = self.chunks.read().await;

        let mut matches: Vec<QueryMatch> = stored
            .values()
            .map(|chunk| QueryMatch {
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                distance: squared_l2(&chunk.vector, vector),
            })
            .collect();

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(k);

        Ok(matches)
    }

    #[inline]
    async fn list_all_metadata(&self) -> Result<Vec<ChunkMetadata>> {
        Ok(self
            .chunks
            .read()
            .await
            .values()
            .map(|chunk| chunk.metadata.clone())
            .collect())
    }

    #[inline]
    async fn delete_source(&self, source: &str) -> Result<()> {
        let mut stored = self.chunks.write().await;
        let before = stored.len();
        stored.retain(|_, chunk| chunk.metadata.source != source);
        debug!(
            "Deleted {} chunks for source {}",
            before - stored.len(),
            source
        );
        Ok(())
    }

    #[inline]
    async fn delete_stale(&self, source: &str, keep: &[String]) -> Result<()> {
        let mut stored = self.chunks.write().await;
        let before = stored.len();
        stored.retain(|id, chunk| chunk.metadata.source != source || keep.contains(id));
        debug!(
            "Deleted {} stale chunks for source {}",
            before - stored.len(),
            source
        );
        Ok(())
    }

    #[inline]
    async fn count(&self) -> Result<u64> {
        Ok(self.chunks.read().await.len() as u64)
    }
}
