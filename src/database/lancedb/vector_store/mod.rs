
use super::{
    CHUNK_INDEX_COLUMN, CONTENT_COLUMN, CREATED_AT_COLUMN, DISTANCE_COLUMN, ID_COLUMN,
    SOURCE_COLUMN, VECTOR_COLUMN, create_schema, quote_literal, stale_predicate,
};
use crate::config::Config;
use crate::database::{ChunkMetadata, QueryMatch, StoredChunk, VectorStore};
use crate::{Result, StudyError};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Vector database store using LanceDB for similarity search
pub struct LanceVectorStore {
    connection: Connection,
    table_name: String,
    /// Dimension the table was created with before any chunk is stored
    placeholder_dimension: usize,
    vector_dimension: RwLock<Option<usize>>,
}

impl LanceVectorStore {
    /// Open (or create) the notes table under the configured base directory
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        let db_path = config
            .vector_database_path()
            .map_err(|e| StudyError::Config(format!("Failed to get base directory: {}", e)))?;

        Self::open(
            &db_path,
            &config.memory.collection,
            config.ollama.embedding_dimension as usize,
        )
        .await
    }

    /// Open (or create) `table_name` in the database at `db_path`
    #[inline]
    pub async fn open(db_path: &Path, table_name: &str, placeholder_dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            StudyError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());

        // Attempt to connect with corruption recovery
        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                if looks_corrupted(&e.to_string()) {
                    warn!("Database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(db_path)?;

                    // Retry connection after recovery
                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        StudyError::Database(format!(
                            "Failed to connect to LanceDB after recovery: {}",
                            e
                        ))
                    })?
                } else {
                    return Err(StudyError::Database(format!(
                        "Failed to connect to LanceDB: {}",
                        e
                    )));
                }
            }
        };

        let store = Self {
            connection,
            table_name: table_name.to_string(),
            placeholder_dimension,
            vector_dimension: RwLock::new(None),
        };

        store.initialize_table_with_recovery().await?;

        info!("Vector store '{}' initialized successfully", store.table_name);
        Ok(store)
    }

    /// Name of the table holding the chunks
    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Dimension of the vectors the table currently accepts
    #[inline]
    pub async fn vector_dimension(&self) -> Option<usize> {
        *self.vector_dimension.read().await
    }

    /// Create the table if it doesn't exist, otherwise pick up its vector dimension
    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| StudyError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            debug!("Table {} already exists, detecting vector dimension", self.table_name);
            let dim = self.detect_existing_vector_dimension().await?;
            *self.vector_dimension.write().await = Some(dim);
            info!("Detected existing vector dimension: {}", dim);
            return Ok(());
        }

        // The real dimension is only known once the first chunk arrives; the
        // table is recreated then if it differs.
        info!(
            "Creating table {} with placeholder dimension {}",
            self.table_name, self.placeholder_dimension
        );

        self.connection
            .create_empty_table(&self.table_name, create_schema(self.placeholder_dimension))
            .execute()
            .await
            .map_err(|e| StudyError::Database(format!("Failed to create table: {}", e)))?;

        *self.vector_dimension.write().await = Some(self.placeholder_dimension);
        Ok(())
    }

    async fn initialize_table_with_recovery(&self) -> Result<()> {
        match self.initialize_table().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let error_msg = e.to_string().to_lowercase();
                if looks_corrupted(&error_msg) || error_msg.contains("schema") {
                    warn!("Table corruption detected during initialization: {}", e);

                    if let Err(drop_err) = self.drop_table_if_exists().await {
                        warn!("Failed to drop corrupted table: {}", drop_err);
                    }

                    self.initialize_table().await.map_err(|e| {
                        StudyError::Database(format!(
                            "Failed to recreate table after corruption: {}",
                            e
                        ))
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.open_table().await?;

        let schema = table
            .schema()
            .await
            .map_err(|e| StudyError::Database(format!("Failed to get table schema: {}", e)))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == VECTOR_COLUMN)
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            })
            .ok_or_else(|| {
                StudyError::Database(
                    "Could not find vector column or determine dimension".to_string(),
                )
            })
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| StudyError::Database(format!("Failed to open table: {}", e)))
    }

    async fn count_rows(&self, table: &Table) -> Result<usize> {
        table
            .count_rows(None)
            .await
            .map_err(|e| StudyError::Database(format!("Failed to count rows: {}", e)))
    }

    /// Recreate table with new vector dimension
    async fn recreate_table_with_dimension(&self, vector_dim: usize) -> Result<()> {
        info!("Recreating table with vector dimension: {}", vector_dim);

        self.drop_table_if_exists().await?;

        self.connection
            .create_empty_table(&self.table_name, create_schema(vector_dim))
            .execute()
            .await
            .map_err(|e| {
                StudyError::Database(format!("Failed to create table with new dimensions: {}", e))
            })?;

        info!(
            "Table recreated successfully with {} dimensions",
            vector_dim
        );
        Ok(())
    }

    async fn drop_table_if_exists(&self) -> Result<()> {
        let table_names =
            self.connection.table_names().execute().await.map_err(|e| {
                StudyError::Database(format!("Failed to list tables for drop: {}", e))
            })?;

        if table_names.contains(&self.table_name) {
            info!("Dropping existing table {}", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| StudyError::Database(format!("Failed to drop table: {}", e)))?;
        }

        Ok(())
    }

    /// Make sure the table accepts vectors of `vector_dim` dimensions.
    ///
    /// An empty table is recreated with the new dimension; a populated one is
    /// never dropped.
    async fn ensure_dimension(&self, vector_dim: usize) -> Result<()> {
        let mut current = self.vector_dimension.write().await;
        if *current == Some(vector_dim) {
            return Ok(());
        }

        let table = self.open_table().await?;
        let rows = self.count_rows(&table).await?;
        if rows > 0 {
            return Err(StudyError::Database(format!(
                "Vector dimension mismatch: table '{}' stores {:?}-dimensional vectors, got {}",
                self.table_name, *current, vector_dim
            )));
        }

        info!(
            "Vector dimension changed from {:?} to {}, recreating empty table",
            *current, vector_dim
        );
        self.recreate_table_with_dimension(vector_dim).await?;
        *current = Some(vector_dim);
        Ok(())
    }

    /// Create a RecordBatch from chunks
    fn create_record_batch(chunks: &[StoredChunk], vector_dim: usize) -> Result<RecordBatch> {
        let len = chunks.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut sources = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for chunk in chunks {
            ids.push(chunk.id.as_str());
            flat_values.extend_from_slice(&chunk.vector);
            sources.push(chunk.metadata.source.as_str());
            contents.push(chunk.content.as_str());
            chunk_indices.push(chunk.metadata.chunk_index);
            created_ats.push(chunk.metadata.created_at.as_str());
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| StudyError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(create_schema(vector_dim), arrays)
            .map_err(|e| StudyError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Drain a LanceDB result stream into record batches
    async fn collect_batches(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StudyError::Database(format!("Failed to read result stream: {}", e)))?
        {
            batches.push(batch);
        }
        Ok(batches)
    }

    fn parse_metadata(batch: &RecordBatch) -> Result<Vec<ChunkMetadata>> {
        let sources = string_column(batch, SOURCE_COLUMN)?;
        let chunk_indices = u32_column(batch, CHUNK_INDEX_COLUMN)?;
        let created_ats = string_column(batch, CREATED_AT_COLUMN)?;

        Ok((0..batch.num_rows())
            .map(|row| ChunkMetadata {
                source: sources.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                created_at: created_ats.value(row).to_string(),
            })
            .collect())
    }

    fn parse_matches(batch: &RecordBatch) -> Result<Vec<QueryMatch>> {
        let metadata = Self::parse_metadata(batch)?;
        let contents = string_column(batch, CONTENT_COLUMN)?;

        // Extract distance scores if available
        let distances = batch
            .column_by_name(DISTANCE_COLUMN)
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        Ok(metadata
            .into_iter()
            .enumerate()
            .map(|(row, metadata)| QueryMatch {
                content: contents.value(row).to_string(),
                metadata,
                distance: distances
                    .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) }),
            })
            .collect())
    }

    /// Attempt to recover from database corruption
    fn attempt_corruption_recovery(db_path: &Path) -> Result<()> {
        warn!("Attempting database corruption recovery at {:?}", db_path);

        // Create backup of corrupted database if it exists
        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {:?}", backup_path);
            }
        }

        // Remove any remaining corrupt files
        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|e| {
                StudyError::Database(format!("Failed to remove corrupted database: {}", e))
            })?;
        }

        std::fs::create_dir_all(db_path).map_err(|e| {
            StudyError::Database(format!("Failed to recreate vector database directory: {}", e))
        })?;

        info!("Database corruption recovery completed");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    #[inline]
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<()> {
        let Some(first) = chunks.first() else {
            debug!("No chunks to store");
            return Ok(());
        };

        let vector_dim = first.vector.len();
        if let Some(bad) = chunks.iter().find(|c| c.vector.len() != vector_dim) {
            return Err(StudyError::Database(format!(
                "Inconsistent vector dimensions in batch: {} has {}, expected {}",
                bad.id,
                bad.vector.len(),
                vector_dim
            )));
        }

        debug!("Upserting batch of {} chunks", chunks.len());
        self.ensure_dimension(vector_dim).await?;

        let record_batch = Self::create_record_batch(&chunks, vector_dim)?;
        let table = self.open_table().await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = table.merge_insert(&[ID_COLUMN]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| StudyError::Database(format!("Failed to upsert chunks: {}", e)))?;

        info!("Successfully stored {} chunks", chunks.len());
        Ok(())
    }

    #[inline]
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>> {
        debug!("Searching for similar vectors with limit: {}", k);

        let table = self.open_table().await?;
        if k == 0 || self.count_rows(&table).await? == 0 {
            debug!("Nothing to search");
            return Ok(Vec::new());
        }

        let expected = self.vector_dimension().await;
        if expected.is_some_and(|dim| dim != vector.len()) {
            return Err(StudyError::Database(format!(
                "Query vector has {} dimensions, table stores {:?}",
                vector.len(),
                expected
            )));
        }

        let results = table
            .vector_search(vector)
            .map_err(|e| StudyError::Database(format!("Failed to create vector search: {}", e)))?
            .column(VECTOR_COLUMN)
            .limit(k)
            .execute()
            .await
            .map_err(|e| StudyError::Database(format!("Failed to execute search: {}", e)))?;

        let mut matches = Vec::new();
        for batch in Self::collect_batches(results).await? {
            matches.extend(Self::parse_matches(&batch)?);
        }
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(k);

        debug!("Found {} matches", matches.len());
        Ok(matches)
    }

    #[inline]
    async fn list_all_metadata(&self) -> Result<Vec<ChunkMetadata>> {
        let table = self.open_table().await?;
        let rows = self.count_rows(&table).await?;
        if rows == 0 {
            return Ok(Vec::new());
        }

        // Plain queries are limited by default, so ask for every row explicitly
        let results = table
            .query()
            .limit(rows)
            .select(Select::columns(&[
                SOURCE_COLUMN,
                CHUNK_INDEX_COLUMN,
                CREATED_AT_COLUMN,
            ]))
            .execute()
            .await
            .map_err(|e| StudyError::Database(format!("Failed to scan table: {}", e)))?;

        let mut metadata = Vec::with_capacity(rows);
        for batch in Self::collect_batches(results).await? {
            metadata.extend(Self::parse_metadata(&batch)?);
        }

        debug!("Read metadata for {} chunks", metadata.len());
        Ok(metadata)
    }

    #[inline]
    async fn delete_source(&self, source: &str) -> Result<()> {
        debug!("Deleting chunks for source: {}", source);

        let table = self.open_table().await?;
        let predicate = format!("{} = {}", SOURCE_COLUMN, quote_literal(source));
        table
            .delete(&predicate)
            .await
            .map_err(|e| StudyError::Database(format!("Failed to delete source chunks: {}", e)))?;

        info!("Deleted chunks for source: {}", source);
        Ok(())
    }

    #[inline]
    async fn delete_stale(&self, source: &str, keep: &[String]) -> Result<()> {
        let table = self.open_table().await?;
        let predicate = stale_predicate(source, keep);
        debug!("Deleting stale chunks where {}", predicate);
        table
            .delete(&predicate)
            .await
            .map_err(|e| StudyError::Database(format!("Failed to delete stale chunks: {}", e)))?;
        Ok(())
    }

    #[inline]
    async fn count(&self) -> Result<u64> {
        let table = self.open_table().await?;
        Ok(self.count_rows(&table).await? as u64)
    }
}

fn looks_corrupted(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("corrupt") || message.contains("invalid") || message.contains("malformed")
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StudyError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| StudyError::Database(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StudyError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| StudyError::Database(format!("Invalid {} column type", name)))
}
