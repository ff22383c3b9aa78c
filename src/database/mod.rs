// Database module
// Vector storage for note chunks: LanceDB on disk, plus an in-process store

pub mod lancedb;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use self::lancedb::LanceVectorStore;
pub use self::memory::InMemoryVectorStore;

/// Provenance attached to every stored chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Human-readable name of the document the chunk came from
    pub source: String,
    /// Position of the chunk within its document
    pub chunk_index: u32,
    /// RFC 3339 timestamp of when the chunk was stored
    pub created_at: String,
}

/// One chunk ready to be written to a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A chunk returned by a nearest-neighbour query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Squared L2 distance to the query vector; lower is closer
    pub distance: f32,
}

/// Persistent collection of chunk embeddings keyed by chunk id
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert the chunks, replacing every field of any chunk whose id already exists
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<()>;

    /// Up to `k` nearest chunks, closest first. An empty store yields an empty list.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>>;

    /// Metadata of every stored chunk
    async fn list_all_metadata(&self) -> Result<Vec<ChunkMetadata>>;

    /// Remove every chunk learned from `source`
    async fn delete_source(&self, source: &str) -> Result<()>;

    /// Remove the chunks of `source` whose id is not in `keep`
    async fn delete_stale(&self, source: &str, keep: &[String]) -> Result<()>;

    /// Number of stored chunks
    async fn count(&self) -> Result<u64>;
}

/// Squared euclidean distance, matching LanceDB's default `l2` metric
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
