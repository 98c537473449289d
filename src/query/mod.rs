
use std::sync::Arc;
use std::time::Instant;

use itertools::Itertools;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::Result;
use crate::chunking::estimate_tokens;
use crate::config::{Config, RetrievalConfig};
use crate::embeddings::pool::EmbeddingPool;
use crate::generation::GenerationClient;
use crate::metrics::{MetricsRecorder, Operation};
use crate::store::VectorStore;

/// Channel capacity for streamed answer fragments.
const STREAM_BUFFER: usize = 32;

/// Assembled context for one query. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalResult {
    /// Chunk texts concatenated in descending similarity order.
    pub context: String,
    /// Distinct file paths of included chunks, in first-seen order.
    pub sources: Vec<String>,
    /// Estimated token count of `context`.
    pub token_count: usize,
}

impl RetrievalResult {
    #[inline]
    pub fn empty() -> Self {
        Self {
            context: String::new(),
            sources: Vec::new(),
            token_count: 0,
        }
    }
}

/// Answers questions against the index: retrieval assembly plus generation.
pub struct QueryEngine {
    pool: Arc<EmbeddingPool>,
    store: Arc<VectorStore>,
    generation: GenerationClient,
    retrieval: RetrievalConfig,
    metrics: Arc<MetricsRecorder>,
}

impl QueryEngine {
    #[inline]
    pub fn new(
        pool: Arc<EmbeddingPool>,
        store: Arc<VectorStore>,
        generation: GenerationClient,
        config: &Config,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            pool,
            store,
            generation,
            retrieval: config.retrieval.clone(),
            metrics,
        }
    }

    /// Retrieve the most relevant indexed chunks for a query and assemble
    /// them into a bounded context string.
    ///
    /// Zero hits (including an empty index) is a valid, empty result.
    #[inline]
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        let query_embedding = self.pool.embed(query).await?;

        let started = Instant::now();
        let hits = self
            .store
            .search(&query_embedding, self.retrieval.top_k)
            .await?;
        self.metrics.record(Operation::Search, started.elapsed());

        if hits.is_empty() {
            debug!("no indexed chunks matched the query");
            return Ok(RetrievalResult::empty());
        }

        let mut context = String::new();
        let mut included_paths = Vec::new();
        let mut token_count = 0;

        for hit in &hits {
            if token_count >= self.retrieval.context_token_budget {
                break;
            }
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&hit.record.chunk_text);
            token_count += estimate_tokens(&hit.record.chunk_text);
            included_paths.push(hit.record.file_path.clone());
        }

        let sources: Vec<String> = included_paths.into_iter().unique().collect();
        debug!(
            hits = hits.len(),
            sources = sources.len(),
            token_count,
            "assembled retrieval context"
        );

        Ok(RetrievalResult {
            context,
            sources,
            token_count,
        })
    }

    /// Answer a question in one shot, draining the generation stream.
    #[inline]
    pub async fn ask(&self, question: &str) -> Result<String> {
        let retrieval = self.retrieve(question).await?;
        let prompt = build_prompt(&retrieval.context, question);

        let client = self.generation.clone();
        let metrics = Arc::clone(&self.metrics);
        let answer = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let answer = client.generate_full(&prompt);
            metrics.record(Operation::Generate, started.elapsed());
            answer
        })
        .await
        .map_err(|error| crate::SemdexError::Generation(format!("Generation task: {error}")))??;

        Ok(answer)
    }

    /// Answer a question as a stream of fragments.
    ///
    /// The generation runs on a blocking task; dropping the receiver stops
    /// forwarding and closes the connection.
    #[inline]
    pub async fn ask_stream(&self, question: &str) -> Result<AnswerStream> {
        let retrieval = self.retrieve(question).await?;
        let prompt = build_prompt(&retrieval.context, question);
        let sources = retrieval.sources.clone();

        let (sender, receiver) = mpsc::channel::<Result<String>>(STREAM_BUFFER);
        let client = self.generation.clone();
        let metrics = Arc::clone(&self.metrics);

        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            match client.generate_stream(&prompt) {
                Ok(stream) => {
                    for fragment in stream {
                        if sender.blocking_send(fragment).is_err() {
                            debug!("answer receiver dropped, stopping generation");
                            break;
                        }
                    }
                }
                Err(error) => {
                    warn!("generation failed to start: {error}");
                    let _ = sender.blocking_send(Err(error));
                }
            }
            metrics.record(Operation::Generate, started.elapsed());
        });

        Ok(AnswerStream { receiver, sources })
    }
}

/// A streamed answer plus the sources that informed it.
pub struct AnswerStream {
    pub receiver: mpsc::Receiver<Result<String>>,
    pub sources: Vec<String>,
}

/// Assemble the generation prompt from retrieved context and the question.
fn build_prompt(context: &str, question: &str) -> String {
    if context.is_empty() {
        return format!(
            "Answer the following question concisely.\n\nQuestion: {question}\n\nAnswer:"
        );
    }
    format!(
        "Use the following file excerpts to answer the question. \
         If the excerpts are not relevant, say so.\n\n\
         Excerpts:\n{context}\n\nQuestion: {question}\n\nAnswer:"
    )
}
