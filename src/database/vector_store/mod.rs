
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection,
    query::{ExecutableQuery, QueryBase},
};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{LibrettoError, Result};

const TABLE_NAME: &str = "chunks";

/// A chunk and its embedding vector, as stored in LanceDB.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    /// Character offset of the chunk within the source document.
    pub start_offset: u64,
    /// Insertion order of the chunk; also the retrieval tie-breaker.
    pub chunk_index: u32,
    pub created_at: String,
}

/// One retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SearchResult {
    pub content: String,
    pub start_offset: u64,
    pub chunk_index: u32,
    pub similarity_score: f32,
    #[serde(skip)]
    pub distance: f32,
}

/// Vector database store using LanceDB for similarity search.
///
/// Reads are safe to share across concurrent queries; the only writers are
/// the index build paths (`store_chunks_batch`, `clear`), which run before
/// the engine is marked ready.
pub struct VectorStore {
    connection: Connection,
    vector_dimension: usize,
}

impl VectorStore {
    /// Open (or create) the store at `db_path` with a fixed vector
    /// dimension. The table is created lazily on first insert so that an
    /// empty store never pins a schema to disk.
    #[inline]
    pub async fn new(db_path: &Path, vector_dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LibrettoError::Retrieval(format!(
                    "Failed to create vector database directory: {}",
                    e
                ))
            })?;
        }

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            LibrettoError::Retrieval(format!("Failed to connect to LanceDB: {}", e))
        })?;

        info!("Vector store initialized at {:?}", db_path);
        Ok(Self {
            connection,
            vector_dimension,
        })
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.vector_dimension as i32,
                ),
                false,
            ),
            Field::new("content", DataType::Utf8, false),
            Field::new("start_offset", DataType::UInt64, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn table_exists(&self) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to list tables: {}", e)))?;
        Ok(table_names.contains(&TABLE_NAME.to_string()))
    }

    async fn ensure_table(&self) -> Result<()> {
        if self.table_exists().await? {
            return Ok(());
        }

        self.connection
            .create_empty_table(TABLE_NAME, self.create_schema())
            .execute()
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to create table: {}", e)))?;

        info!(
            "Chunks table created with {} dimensions",
            self.vector_dimension
        );
        Ok(())
    }

    /// Store a batch of chunk records.
    #[inline]
    pub async fn store_chunks_batch(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            debug!("No chunks to store");
            return Ok(());
        }

        for record in records {
            if record.vector.len() != self.vector_dimension {
                return Err(LibrettoError::Retrieval(format!(
                    "Vector dimension mismatch: expected {}, got {}",
                    self.vector_dimension,
                    record.vector.len()
                )));
            }
        }

        self.ensure_table().await?;

        let record_batch = self.create_record_batch(records)?;

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to open table: {}", e)))?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to insert chunks: {}", e)))?;

        debug!("Stored batch of {} chunks", records.len());
        Ok(())
    }

    fn create_record_batch(&self, records: &[ChunkRecord]) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut vectors = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut start_offsets = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            vectors.push(&record.vector);
            contents.push(record.content.as_str());
            start_offsets.push(record.start_offset);
            chunk_indices.push(record.chunk_index);
            created_ats.push(record.created_at.as_str());
        }

        let mut flat_values = Vec::with_capacity(len * self.vector_dimension);
        for vector in &vectors {
            flat_values.extend_from_slice(vector);
        }
        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.vector_dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| LibrettoError::Retrieval(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt64Array::from(start_offsets)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to create record batch: {}", e)))
    }

    /// Search for the `limit` chunks most similar to `query_vector`.
    ///
    /// Results are ordered by ascending distance; equal distances resolve by
    /// chunk insertion order, so identical queries always retrieve the same
    /// chunks in the same order.
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        if !self.table_exists().await? {
            return Ok(Vec::new());
        }

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to open table: {}", e)))?;

        let query = table
            .vector_search(query_vector)
            .map_err(|e| {
                LibrettoError::Retrieval(format!("Failed to create vector search: {}", e))
            })?
            .column("vector")
            .limit(limit);

        let mut stream = query
            .execute()
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to execute search: {}", e)))?;

        let mut results = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(|e| {
            LibrettoError::Retrieval(format!("Failed to read result stream: {}", e))
        })? {
            results.extend(self.parse_search_batch(&batch)?);
        }

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        results.truncate(limit);

        debug!("Search returned {} results", results.len());
        Ok(results)
    }

    fn parse_search_batch(&self, batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let contents = batch
            .column_by_name("content")
            .ok_or_else(|| LibrettoError::Retrieval("Missing content column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| LibrettoError::Retrieval("Invalid content column type".to_string()))?;

        let start_offsets = batch
            .column_by_name("start_offset")
            .ok_or_else(|| LibrettoError::Retrieval("Missing start_offset column".to_string()))?
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| {
                LibrettoError::Retrieval("Invalid start_offset column type".to_string())
            })?;

        let chunk_indices = batch
            .column_by_name("chunk_index")
            .ok_or_else(|| LibrettoError::Retrieval("Missing chunk_index column".to_string()))?
            .as_any()
            .downcast_ref::<UInt32Array>()
            .ok_or_else(|| {
                LibrettoError::Retrieval("Invalid chunk_index column type".to_string())
            })?;

        let distances = batch
            .column_by_name("_distance")
            .map(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances
                .flatten()
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            results.push(SearchResult {
                content: contents.value(row).to_string(),
                start_offset: start_offsets.value(row),
                chunk_index: chunk_indices.value(row),
                similarity_score: 1.0 - distance,
                distance,
            });
        }

        Ok(results)
    }

    /// Count the rows currently stored.
    #[inline]
    pub async fn count_chunks(&self) -> Result<u64> {
        if !self.table_exists().await? {
            return Ok(0);
        }

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to open table: {}", e)))?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| LibrettoError::Retrieval(format!("Failed to count rows: {}", e)))?;

        Ok(count as u64)
    }

    /// Drop all stored chunks; used when a rebuild invalidates the index.
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        if self.table_exists().await? {
            info!("Dropping existing chunks table");
            self.connection
                .drop_table(TABLE_NAME)
                .await
                .map_err(|e| LibrettoError::Retrieval(format!("Failed to drop table: {}", e)))?;
        }
        Ok(())
    }
}
