// LanceDB vector database module
// Handles on-disk vector storage and similarity search for note chunks


pub mod vector_store;

use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

pub use vector_store::LanceVectorStore;

pub(crate) const ID_COLUMN: &str = "id";
pub(crate) const VECTOR_COLUMN: &str = "vector";
pub(crate) const SOURCE_COLUMN: &str = "source";
pub(crate) const CONTENT_COLUMN: &str = "content";
pub(crate) const CHUNK_INDEX_COLUMN: &str = "chunk_index";
pub(crate) const CREATED_AT_COLUMN: &str = "created_at";
pub(crate) const DISTANCE_COLUMN: &str = "_distance";

/// Table schema for chunks with vectors of `vector_dim` dimensions
#[inline]
pub fn create_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(ID_COLUMN, DataType::Utf8, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new(SOURCE_COLUMN, DataType::Utf8, false),
        Field::new(CONTENT_COLUMN, DataType::Utf8, false),
        Field::new(CHUNK_INDEX_COLUMN, DataType::UInt32, false),
        Field::new(CREATED_AT_COLUMN, DataType::Utf8, false),
    ]))
}

/// Quote a string literal for use in a LanceDB filter predicate
#[inline]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Filter matching the chunks of `source` not listed in `keep`
#[inline]
pub fn stale_predicate(source: &str, keep: &[String]) -> String {
    let by_source = format!("{} = {}", SOURCE_COLUMN, quote_literal(source));
    if keep.is_empty() {
        return by_source;
    }
    let ids: Vec<String> = keep.iter().map(|id| quote_literal(id)).collect();
    format!("{} AND {} NOT IN ({})", by_source, ID_COLUMN, ids.join(", "))
}
