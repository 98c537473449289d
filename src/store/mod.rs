
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase, Select},
};
use tracing::{debug, info, warn};

use crate::chunking::{TextChunk, estimate_tokens};
use crate::{Result, SemdexError};

const TABLE_NAME: &str = "chunks";

/// Persisted vector record for one chunk of one file.
///
/// The id is `file_path:chunk_index`, so re-indexing a file overwrites its
/// previous records instead of duplicating them.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub file_path: String,
    pub chunk_index: u32,
    pub indexed_at: String,
}

/// One nearest-neighbor hit, highest similarity first.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub record: ChunkRecord,
    pub similarity: f32,
    pub distance: f32,
}

/// Aggregate view of the store. All fields are zero/`None` when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub total_files: u64,
    pub total_chunks: u64,
    pub total_tokens: u64,
    pub disk_size_bytes: u64,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// Embedded on-disk vector database backed by LanceDB.
///
/// The store is the only durable shared mutable resource in the pipeline;
/// mutation assumes a single logical writer at a time.
pub struct VectorStore {
    connection: Connection,
    dimensions: usize,
    data_dir: PathBuf,
}

/// Deterministic record identifier for a file's chunk.
#[inline]
pub fn record_id(file_path: &str, chunk_index: usize) -> String {
    format!("{}:{}", file_path, chunk_index)
}

/// Escape a user-controlled string for embedding in a LanceDB filter literal.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn store_err(operation: &str, error: impl std::fmt::Display) -> SemdexError {
    SemdexError::Store(format!("{}: {}", operation, error))
}

/// "Not found"/empty conditions from the engine normalize to the empty case
/// rather than an error.
fn is_not_found(error: &lancedb::Error) -> bool {
    error.to_string().to_lowercase().contains("not found")
}

impl VectorStore {
    /// Open or create the store at `data_dir`. Idempotent: reopening the
    /// same location is a no-op beyond reconnecting.
    #[inline]
    pub async fn open(data_dir: &Path, dimensions: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", data_dir);
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| store_err("Failed to create vector store directory", e))?;

        let uri = format!("file://{}", data_dir.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| store_err("Failed to connect to LanceDB", e))?;

        let store = Self {
            connection,
            dimensions,
            data_dir: data_dir.to_path_buf(),
        };
        store.ensure_table().await?;

        info!(dimensions, "vector store ready at {}", data_dir.display());
        Ok(store)
    }

    /// Process-wide embedding dimensionality this store was opened with.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimensions as i32,
                ),
                false,
            ),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("indexed_at", DataType::Utf8, false),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_err("Failed to list tables", e))?;

        if table_names.iter().any(|name| name == TABLE_NAME) {
            return Ok(());
        }

        self.connection
            .create_empty_table(TABLE_NAME, self.schema())
            .execute()
            .await
            .map_err(|e| store_err("Failed to create chunks table", e))?;

        debug!("created empty chunks table");
        Ok(())
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| store_err("Failed to open chunks table", e))
    }

    /// Upsert one file's chunks with their embeddings.
    ///
    /// `chunks` and `embeddings` must be the same length and every embedding
    /// must match the store dimensionality; a shape failure writes nothing.
    /// Empty input is a successful no-op. Records are keyed by
    /// `file_path:chunk_index`, so repeated calls overwrite.
    #[inline]
    pub async fn add_chunks(
        &self,
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
        file_path: &str,
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(SemdexError::Shape(format!(
                "Chunk/embedding count mismatch for {}: {} chunks vs {} embeddings",
                file_path,
                chunks.len(),
                embeddings.len()
            )));
        }
        if chunks.is_empty() {
            debug!("no chunks to store for {}", file_path);
            return Ok(0);
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimensions) {
            return Err(SemdexError::Shape(format!(
                "Embedding dimension mismatch for {}: got {}, store expects {}",
                file_path,
                bad.len(),
                self.dimensions
            )));
        }

        let indexed_at = Utc::now().to_rfc3339();
        let batch = self.build_record_batch(chunks, embeddings, file_path, &indexed_at)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let table = self.open_table().await?;
        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| store_err("Failed to upsert chunk records", e))?;

        debug!("stored {} chunk records for {}", chunks.len(), file_path);
        Ok(chunks.len())
    }

    fn build_record_batch(
        &self,
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
        file_path: &str,
        indexed_at: &str,
    ) -> Result<RecordBatch> {
        let len = chunks.len();
        let mut ids = Vec::with_capacity(len);
        let mut texts = Vec::with_capacity(len);
        let mut file_paths = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut indexed_ats = Vec::with_capacity(len);

        for chunk in chunks {
            ids.push(record_id(file_path, chunk.chunk_index));
            texts.push(chunk.text.as_str());
            file_paths.push(file_path);
            chunk_indices.push(u32::try_from(chunk.chunk_index).map_err(|_| {
                SemdexError::Shape(format!("Chunk index {} out of range", chunk.chunk_index))
            })?);
            indexed_ats.push(indexed_at);
        }

        let mut flat_values = Vec::with_capacity(len * self.dimensions);
        for embedding in embeddings {
            flat_values.extend_from_slice(embedding);
        }
        let values_array = Float32Array::from(flat_values);
        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let embedding_array = FixedSizeListArray::try_new(
            item_field,
            self.dimensions as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| store_err("Failed to build embedding array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(embedding_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(file_paths)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(indexed_ats)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| store_err("Failed to build record batch", e))
    }

    /// Nearest-neighbor search, best matches first. An empty store returns
    /// an empty list, not an error.
    #[inline]
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimensions {
            return Err(SemdexError::Shape(format!(
                "Query dimension mismatch: got {}, store expects {}",
                query.len(),
                self.dimensions
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;
        let results = table
            .vector_search(query)
            .map_err(|e| store_err("Failed to build vector search", e))?
            .column("embedding")
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await;

        let mut stream = match results {
            Ok(stream) => stream,
            Err(error) if is_not_found(&error) => return Ok(Vec::new()),
            Err(error) => return Err(store_err("Failed to execute vector search", error)),
        };

        let mut hits = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| store_err("Failed to read search results", e))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        debug!("vector search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Remove every record whose `file_path` equals `file_path` exactly.
    /// Returns the number of records removed; an absent file removes 0.
    #[inline]
    pub async fn delete_file(&self, file_path: &str) -> Result<u64> {
        let table = self.open_table().await?;
        let predicate = format!("file_path = '{}'", escape_literal(file_path));

        let matched = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| store_err("Failed to count records for delete", e))?;
        if matched == 0 {
            return Ok(0);
        }

        table
            .delete(&predicate)
            .await
            .map_err(|e| store_err("Failed to delete file records", e))?;

        info!("deleted {} chunk records for {}", matched, file_path);
        Ok(matched as u64)
    }

    /// Aggregate statistics; all zeros for an empty store.
    #[inline]
    pub async fn stats(&self) -> Result<IndexStats> {
        let table = self.open_table().await?;
        let total_chunks = table
            .count_rows(None)
            .await
            .map_err(|e| store_err("Failed to count records", e))? as u64;

        let disk_size_bytes = dir_size(&self.data_dir);
        if total_chunks == 0 {
            return Ok(IndexStats {
                disk_size_bytes,
                ..IndexStats::default()
            });
        }

        let mut stream = table
            .query()
            .select(Select::Columns(vec![
                "chunk_text".to_string(),
                "file_path".to_string(),
                "indexed_at".to_string(),
            ]))
            .execute()
            .await
            .map_err(|e| store_err("Failed to scan records for stats", e))?;

        let mut files = HashSet::new();
        let mut total_tokens = 0u64;
        let mut last_indexed: Option<DateTime<Utc>> = None;

        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| store_err("Failed to read stats scan", e))?
        {
            let texts = string_column(&batch, "chunk_text")?;
            let paths = string_column(&batch, "file_path")?;
            let stamps = string_column(&batch, "indexed_at")?;

            for row in 0..batch.num_rows() {
                total_tokens += estimate_tokens(texts.value(row)) as u64;
                files.insert(paths.value(row).to_string());
                if let Ok(stamp) = DateTime::parse_from_rfc3339(stamps.value(row)) {
                    let stamp = stamp.with_timezone(&Utc);
                    if last_indexed.is_none_or(|current| stamp > current) {
                        last_indexed = Some(stamp);
                    }
                }
            }
        }

        Ok(IndexStats {
            total_files: files.len() as u64,
            total_chunks,
            total_tokens,
            disk_size_bytes,
            last_indexed,
        })
    }

    /// Destroy and recreate the chunks table, returning to the empty state.
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_err("Failed to list tables", e))?;

        if table_names.iter().any(|name| name == TABLE_NAME) {
            self.connection
                .drop_table(TABLE_NAME)
                .await
                .map_err(|e| store_err("Failed to drop chunks table", e))?;
        }

        self.ensure_table().await?;
        info!("vector store cleared");
        Ok(())
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| SemdexError::Store(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| SemdexError::Store(format!("Invalid {} column type", name)))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    let ids = string_column(batch, "id")?;
    let texts = string_column(batch, "chunk_text")?;
    let paths = string_column(batch, "file_path")?;
    let stamps = string_column(batch, "indexed_at")?;

    let chunk_indices = batch
        .column_by_name("chunk_index")
        .ok_or_else(|| SemdexError::Store("Missing chunk_index column".to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| SemdexError::Store("Invalid chunk_index column type".to_string()))?;

    let embeddings = batch
        .column_by_name("embedding")
        .ok_or_else(|| SemdexError::Store("Missing embedding column".to_string()))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| SemdexError::Store("Invalid embedding column type".to_string()))?;

    let distances = batch
        .column_by_name("_distance")
        .map(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut results = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let embedding = embeddings
            .value(row)
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|values| values.values().to_vec())
            .unwrap_or_default();

        let distance = distances
            .flatten()
            .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        results.push(SearchResult {
            record: ChunkRecord {
                id: ids.value(row).to_string(),
                chunk_text: texts.value(row).to_string(),
                embedding,
                file_path: paths.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                indexed_at: stamps.value(row).to_string(),
            },
            // Cosine distance converts directly to similarity.
            similarity: 1.0 - distance,
            distance,
        });
    }

    Ok(results)
}

/// Approximate on-disk footprint; IO errors just undercount.
fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };

    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            warn!("could not stat {:?} while sizing store", entry.path());
            continue;
        };
        if metadata.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += metadata.len();
        }
    }
    total
}
