
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::Result;
use crate::chunking::{TextChunk, chunk_text, metadata_chunk};
use crate::config::{ChunkingConfig, Config};
use crate::embeddings::pool::EmbeddingPool;
use crate::extractor::{ContentExtractor, Extraction};
use crate::metrics::{MetricsRecorder, Operation};
use crate::store::VectorStore;

/// Per-file result of an indexing run. Failures are values here so that one
/// bad file never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub file_path: String,
    pub success: bool,
    pub chunks_created: usize,
    pub error: Option<String>,
}

/// Drives the extract -> chunk -> embed -> persist pipeline.
pub struct Indexer {
    pool: Arc<EmbeddingPool>,
    store: Arc<VectorStore>,
    extractor: ContentExtractor,
    chunking: ChunkingConfig,
    concurrency: usize,
    metrics: Arc<MetricsRecorder>,
}

impl Indexer {
    #[inline]
    pub fn new(
        pool: Arc<EmbeddingPool>,
        store: Arc<VectorStore>,
        config: &Config,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            pool,
            store,
            extractor: ContentExtractor::new(config.indexing.max_file_size_bytes),
            chunking: config.chunking.clone(),
            concurrency: config.indexing.concurrency.max(1),
            metrics,
        }
    }

    /// Index a single file, replacing any records from earlier runs.
    #[inline]
    pub async fn index_file(&self, path: &Path) -> FileOutcome {
        let file_path = path.to_string_lossy().into_owned();
        match self.index_file_inner(path, &file_path).await {
            Ok(chunks_created) => {
                debug!(chunks_created, "indexed {file_path}");
                FileOutcome {
                    file_path,
                    success: true,
                    chunks_created,
                    error: None,
                }
            }
            Err(error) => {
                warn!("failed to index {file_path}: {error}");
                FileOutcome {
                    file_path,
                    success: false,
                    chunks_created: 0,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// Index a batch of files with bounded concurrency, collecting per-file
    /// outcomes in completion order.
    #[inline]
    pub async fn index_files(&self, paths: &[PathBuf]) -> Vec<FileOutcome> {
        info!(
            files = paths.len(),
            concurrency = self.concurrency,
            "starting indexing run"
        );

        let outcomes: Vec<FileOutcome> = futures::stream::iter(paths)
            .map(|path| self.index_file(path))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|outcome| !outcome.success).count();
        info!(
            succeeded = outcomes.len() - failed,
            failed, "indexing run finished"
        );
        outcomes
    }

    async fn index_file_inner(&self, path: &Path, file_path: &str) -> Result<usize> {
        let started = Instant::now();
        let extraction = self.extractor.extract(path)?;
        self.metrics.record(Operation::Extract, started.elapsed());

        let chunks = self.chunks_for(path, extraction);
        if chunks.is_empty() {
            // Empty extraction still clears records from earlier runs.
            self.store.delete_file(file_path).await?;
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let started = Instant::now();
        let embeddings = self.pool.embed_batch(texts).await?;
        self.metrics.record(Operation::Embed, started.elapsed());

        // Delete-then-add keeps the record set equal to the latest chunk set
        // even when the chunk count shrinks between runs.
        let started = Instant::now();
        self.store.delete_file(file_path).await?;
        let written = self.store.add_chunks(&chunks, &embeddings, file_path).await?;
        self.metrics.record(Operation::StoreWrite, started.elapsed());

        Ok(written)
    }

    fn chunks_for(&self, path: &Path, extraction: Extraction) -> Vec<TextChunk> {
        match extraction {
            Extraction::Text(text) => {
                let started = Instant::now();
                let chunks = chunk_text(&text, &self.chunking);
                self.metrics.record(Operation::Chunk, started.elapsed());
                chunks
            }
            Extraction::Fallback {
                detected_kind,
                size_bytes,
            } => {
                debug!(
                    detected_kind,
                    size_bytes,
                    "indexing metadata fallback for {}",
                    path.display()
                );
                vec![metadata_chunk(path, &detected_kind, size_bytes)]
            }
        }
    }
}
