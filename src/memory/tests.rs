use super::*;
use crate::database::{InMemoryVectorStore, QueryMatch};
use crate::{Result, StudyError};
use async_trait::async_trait;
use std::sync::Mutex;
use tempfile::TempDir;

const KEYWORDS: [&str; 6] = ["cell", "atom", "war", "poem", "river", "number"];

fn keyword_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
        .collect()
}

/// Embeds by keyword presence and fails on any text containing `FAIL`
#[derive(Default)]
struct KeywordEmbedder {
    tasks: Mutex<Vec<EmbedTask>>,
}

impl KeywordEmbedder {
    fn tasks(&self) -> Vec<EmbedTask> {
        self.tasks.lock().expect("should lock tasks").clone()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>> {
        self.tasks.lock().expect("should lock tasks").push(task);
        if text.contains("FAIL") {
            return Err(StudyError::Embedding("service unavailable".to_string()));
        }
        Ok(keyword_embedding(text))
    }
}

struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
        Err(StudyError::Embedding("quota exceeded".to_string()))
    }
}

struct UnavailableStore;

#[async_trait]
impl VectorStore for UnavailableStore {
    async fn upsert(&self, _chunks: Vec<StoredChunk>) -> Result<()> {
        Err(StudyError::Database("disk full".to_string()))
    }

    async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<QueryMatch>> {
        Err(StudyError::Database("table missing".to_string()))
    }

    async fn list_all_metadata(&self) -> Result<Vec<ChunkMetadata>> {
        Err(StudyError::Database("table missing".to_string()))
    }

    async fn delete_source(&self, _source: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_stale(&self, _source: &str, _keep: &[String]) -> Result<()> {
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Err(StudyError::Database("table missing".to_string()))
    }
}

/// Embeds every text as a vector of `dimension` ones
struct FixedWidthEmbedder {
    dimension: usize,
}

#[async_trait]
impl Embedder for FixedWidthEmbedder {
    async fn embed(&self, _text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
        Ok(vec![1.0; self.dimension])
    }
}

/// In-memory store whose writes fail once `full` is set
#[derive(Default)]
struct FillingStore {
    inner: InMemoryVectorStore,
    full: std::sync::atomic::AtomicBool,
}

impl FillingStore {
    fn fill(&self) {
        self.full.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for FillingStore {
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<()> {
        if self.full.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StudyError::Database("disk full".to_string()));
        }
        self.inner.upsert(chunks).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>> {
        self.inner.query(vector, k).await
    }

    async fn list_all_metadata(&self) -> Result<Vec<ChunkMetadata>> {
        self.inner.list_all_metadata().await
    }

    async fn delete_source(&self, source: &str) -> Result<()> {
        self.inner.delete_source(source).await
    }

    async fn delete_stale(&self, source: &str, keep: &[String]) -> Result<()> {
        self.inner.delete_stale(source, keep).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

fn memory_config(chunk_size: usize) -> MemoryConfig {
    MemoryConfig {
        chunk_size,
        ..MemoryConfig::default()
    }
}

fn setup(chunk_size: usize) -> (MemoryManager, Arc<KeywordEmbedder>, Arc<InMemoryVectorStore>) {
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(InMemoryVectorStore::new());
    let manager = MemoryManager::new(
        memory_config(chunk_size),
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        Arc::clone(&store) as Arc<dyn VectorStore>,
    );
    (manager, embedder, store)
}

#[tokio::test]
async fn empty_text_stores_nothing() {
    let (manager, embedder, store) = setup(10);

    assert_eq!(manager.learn("", "empty.txt").await, LearnOutcome::NothingToStore);
    assert_eq!(
        manager.learn("  \n\t ", "blank.txt").await,
        LearnOutcome::NothingToStore
    );

    assert_eq!(store.count().await.expect("should count"), 0);
    assert!(embedder.tasks().is_empty());
}

#[tokio::test]
async fn learn_stores_every_chunk_with_ids() {
    let (manager, embedder, store) = setup(10);
    let text = "a".repeat(25);

    let outcome = manager.learn(&text, "notes.txt").await;

    assert_eq!(
        outcome,
        LearnOutcome::Stored {
            source: "notes.txt".to_string(),
            stored: 3,
            attempted: 3,
        }
    );
    assert!(!outcome.is_error());
    assert!(!outcome.is_partial());
    assert_eq!(
        store.ids().await,
        vec![
            "notes.txt_part_0".to_string(),
            "notes.txt_part_1".to_string(),
            "notes.txt_part_2".to_string(),
        ]
    );
    assert!(embedder.tasks().iter().all(|t| *t == EmbedTask::Document));
}

#[tokio::test]
async fn learn_then_answer_returns_closest_chunk() {
    let (manager, embedder, _store) = setup(20);
    manager.learn("The cell membrane..", "biology.pdf").await;
    manager.learn("A river flows south", "geography.pdf").await;

    let outcome = manager.answer("What does a river do?").await;

    match &outcome {
        AnswerOutcome::Found { sources, context } => {
            assert!(sources.contains("geography.pdf"));
            assert!(context.starts_with("A river flows south"));
        }
        other => panic!("expected Found, got {other:?}"),
    }
    assert!(
        outcome
            .to_string()
            .starts_with("Information found in (")
    );
    assert_eq!(embedder.tasks().last(), Some(&EmbedTask::Query));
}

#[tokio::test]
async fn answer_joins_context_in_relevance_order() {
    let config = MemoryConfig {
        top_k: 2,
        ..MemoryConfig::default()
    };
    let manager = MemoryManager::new(
        config,
        Arc::new(KeywordEmbedder::default()),
        Arc::new(InMemoryVectorStore::new()),
    );
    manager.learn("atom and cell", "b.pdf").await;
    manager.learn("atom only", "a.pdf").await;
    manager.learn("a poem", "c.pdf").await;

    let outcome = manager.answer("atom and cell").await;

    assert_eq!(
        outcome.to_string(),
        "Information found in (a.pdf, b.pdf):\natom and cell\n---\natom only"
    );
}

#[tokio::test]
async fn relearning_same_source_keeps_size() {
    let (manager, _embedder, store) = setup(10);
    let text = "b".repeat(30);

    manager.learn(&text, "same.txt").await;
    let first = store.count().await.expect("should count");
    manager.learn(&text, "same.txt").await;
    let second = store.count().await.expect("should count");

    assert_eq!(first, 3);
    assert_eq!(first, second);
}

#[tokio::test]
async fn relearning_shorter_document_leaves_no_stale_chunks() {
    let (manager, _embedder, store) = setup(10);
    manager.learn(&"c".repeat(40), "draft.txt").await;
    manager.learn(&"x".repeat(5), "other.txt").await;
    assert_eq!(store.count().await.expect("should count"), 5);

    manager.learn(&"d".repeat(15), "draft.txt").await;

    assert_eq!(
        store.ids().await,
        vec![
            "draft.txt_part_0".to_string(),
            "draft.txt_part_1".to_string(),
            "other.txt_part_0".to_string(),
        ]
    );
}

#[tokio::test]
async fn failed_chunk_is_skipped() {
    let (manager, _embedder, store) = setup(10);
    let text = format!("{}{}{}", "a".repeat(10), "FAIL".repeat(2), "b".repeat(12));

    let outcome = manager.learn(&text, "flaky.txt").await;

    assert_eq!(
        outcome,
        LearnOutcome::Stored {
            source: "flaky.txt".to_string(),
            stored: 2,
            attempted: 3,
        }
    );
    assert!(outcome.is_partial());
    assert!(outcome.to_string().contains("2 of 3"));
    assert_eq!(
        store.ids().await,
        vec![
            "flaky.txt_part_0".to_string(),
            "flaky.txt_part_2".to_string(),
        ]
    );
}

#[tokio::test]
async fn total_embedding_failure_keeps_previous_knowledge() {
    let (manager, _embedder, store) = setup(10);
    manager.learn(&"e".repeat(20), "kept.txt").await;

    let broken = MemoryManager::new(
        memory_config(10),
        Arc::new(BrokenEmbedder),
        Arc::clone(&store) as Arc<dyn VectorStore>,
    );
    let outcome = broken.learn(&"f".repeat(50), "kept.txt").await;

    assert!(outcome.is_error());
    assert!(matches!(outcome, LearnOutcome::Failed { ref source, .. } if source == "kept.txt"));
    assert_eq!(store.count().await.expect("should count"), 2);
}

#[tokio::test]
async fn store_failure_is_reported() {
    let manager = MemoryManager::new(
        memory_config(10),
        Arc::new(KeywordEmbedder::default()),
        Arc::new(UnavailableStore),
    );

    let learn = manager.learn("some cell notes", "x.pdf").await;
    assert!(matches!(learn, LearnOutcome::Failed { ref reason, .. } if reason.contains("disk full")));

    let answer = manager.answer("cell?").await;
    assert_eq!(
        answer,
        AnswerOutcome::StorageFailed("Database error: table missing".to_string())
    );
    assert!(answer.is_error());

    let listing = manager.list_sources().await;
    assert!(listing.is_error());
    assert!(listing.to_string().starts_with("Error reading memory:"));
}

#[tokio::test]
async fn failed_upsert_keeps_previous_chunks() {
    let store = Arc::new(FillingStore::default());
    let manager = MemoryManager::new(
        memory_config(10),
        Arc::new(KeywordEmbedder::default()),
        Arc::clone(&store) as Arc<dyn VectorStore>,
    );

    let first = manager.learn("cell atoms and more", "bio.txt").await;
    assert!(matches!(first, LearnOutcome::Stored { stored: 2, .. }));

    store.fill();
    let second = manager.learn("a river poem", "bio.txt").await;
    assert!(matches!(second, LearnOutcome::Failed { ref reason, .. } if reason.contains("disk full")));

    assert_eq!(
        store.inner.ids().await,
        vec!["bio.txt_part_0".to_string(), "bio.txt_part_1".to_string()]
    );
    assert!(matches!(
        manager.answer("cell?").await,
        AnswerOutcome::Found { ref context, .. } if context.contains("cell atoms")
    ));
}

#[tokio::test]
async fn dimension_change_keeps_previous_chunks() {
    let store = Arc::new(InMemoryVectorStore::new());
    let narrow = MemoryManager::new(
        memory_config(10),
        Arc::new(FixedWidthEmbedder { dimension: 6 }),
        Arc::clone(&store) as Arc<dyn VectorStore>,
    );
    let wide = MemoryManager::new(
        memory_config(10),
        Arc::new(FixedWidthEmbedder { dimension: 7 }),
        Arc::clone(&store) as Arc<dyn VectorStore>,
    );

    narrow.learn("old notes", "notes.txt").await;
    let outcome = wide.learn("new notes", "notes.txt").await;

    assert!(matches!(outcome, LearnOutcome::Failed { .. }));
    assert_eq!(store.ids().await, vec!["notes.txt_part_0".to_string()]);
    assert_eq!(
        narrow.list_sources().await.to_string(),
        "Studied files: notes.txt"
    );
}

#[test]
fn chunk_index_rejects_positions_beyond_u32() {
    assert_eq!(chunk_index(0), Some(0));
    assert_eq!(chunk_index(u32::MAX as usize), Some(u32::MAX));
    #[cfg(target_pointer_width = "64")]
    assert_eq!(chunk_index(u32::MAX as usize + 1), None);
}

#[tokio::test]
async fn answer_on_empty_store() {
    let (manager, _embedder, _store) = setup(10);

    let outcome = manager.answer("anything about atoms?").await;

    assert_eq!(outcome, AnswerOutcome::NoRelevantInformation);
    assert!(!outcome.is_error());
}

#[tokio::test]
async fn unprocessable_question() {
    let (manager, embedder, _store) = setup(10);

    assert_eq!(manager.answer("   ").await, AnswerOutcome::QuestionNotProcessed);
    assert!(embedder.tasks().is_empty());

    assert_eq!(
        manager.answer("FAIL please").await,
        AnswerOutcome::QuestionNotProcessed
    );
}

#[tokio::test]
async fn list_sources_reports_distinct_names() {
    let (manager, _embedder, _store) = setup(10);

    let empty = manager.list_sources().await;
    assert_eq!(empty, SourceListing::Empty);
    assert_eq!(empty.to_string(), "Memory is empty.");

    manager.learn(&"g".repeat(35), "zoology.pdf").await;
    manager.learn("short note", "algebra.txt").await;

    let listing = manager.list_sources().await;
    assert_eq!(listing.to_string(), "Studied files: algebra.txt, zoology.pdf");
}

#[tokio::test]
async fn learn_files_reports_counts() {
    let (manager, _embedder, store) = setup(100);
    let temp_dir = TempDir::new().expect("should create temp dir");
    let good = temp_dir.path().join("chapter1.txt");
    let empty = temp_dir.path().join("blank.txt");
    let missing = temp_dir.path().join("missing.txt");
    std::fs::write(&good, "Every number has a successor.").expect("should write file");
    std::fs::write(&empty, "").expect("should write file");

    let mut seen = Vec::new();
    let report = manager
        .learn_files_with(&[good.clone(), empty, missing], |path, _| {
            seen.push(path.to_path_buf());
        })
        .await;

    assert_eq!(report.learned, 1);
    assert_eq!(report.total, 3);
    assert_eq!(seen.len(), 3);
    assert_eq!(report.outcomes[1].1, LearnOutcome::NothingToStore);
    assert!(report.outcomes[2].1.is_error());
    assert!(
        report
            .to_string()
            .ends_with("Finished. Memorized 1 of 3 documents.")
    );
    assert!(!report.is_error());

    let listing = manager.list_sources().await;
    assert_eq!(listing.to_string(), "Studied files: chapter1.txt");
    assert_eq!(store.count().await.expect("should count"), 1);
}

#[tokio::test]
async fn concurrent_embedding_keeps_chunk_order() {
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(InMemoryVectorStore::new());
    let manager = MemoryManager::new(
        MemoryConfig {
            chunk_size: 5,
            embed_concurrency: 4,
            ..MemoryConfig::default()
        },
        embedder,
        Arc::clone(&store) as Arc<dyn VectorStore>,
    );

    let outcome = manager.learn("cell atom war  poem river", "mix.txt").await;
    assert!(matches!(outcome, LearnOutcome::Stored { stored: 5, .. }));

    let metadata = store.list_all_metadata().await.expect("should list");
    let mut indices: Vec<u32> = metadata.iter().map(|m| m.chunk_index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);

    let matches = store
        .query(&keyword_embedding("poem"), 1)
        .await
        .expect("should query");
    assert_eq!(matches[0].content, "poem ");
}
