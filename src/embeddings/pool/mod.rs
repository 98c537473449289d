#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc as async_mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::embeddings::EmbedderFactory;
use crate::{Result, SemdexError};

/// Progress events fire at most every this many batch items, and the worker
/// takes a coarser yield at the same cadence.
const PROGRESS_INTERVAL: usize = 8;

/// Fired with `(completed, total)` as a batch advances.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + 'static>;

/// Messages sent into the worker thread.
enum WorkerRequest {
    Embed { id: u64, texts: Vec<String> },
    Terminate,
}

/// Messages sent back from the worker thread. Matched to callers by
/// correlation id, never by arrival order.
enum WorkerEvent {
    /// Channel alive, model not yet loaded.
    Ready,
    /// Model loaded and serving.
    Initialized { dimensions: usize },
    Result { id: u64, embeddings: Vec<Vec<f32>> },
    Progress { id: u64, current: usize, total: usize },
    /// `id: None` marks an initialization failure.
    Error { id: Option<u64>, message: String },
}

#[derive(Default)]
struct Shared {
    pending: HashMap<u64, oneshot::Sender<Result<Vec<Vec<f32>>>>>,
    progress: HashMap<u64, ProgressCallback>,
}

/// Dispatcher-observed worker liveness, checked before every submit.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkerStatus {
    Running,
    Exited(String),
}

struct WorkerHandle {
    request_tx: mpsc::Sender<WorkerRequest>,
    shared: Arc<Mutex<Shared>>,
    status: Arc<Mutex<WorkerStatus>>,
}

/// Lifecycle: `Uninitialized -> Ready` (lazily, on first request),
/// `Ready -> Failed` when the worker exits, `Failed -> Uninitialized` only
/// via explicit [`EmbeddingPool::reinitialize`]. The transitional
/// "initializing" phase lives under the state mutex, which is what makes
/// concurrent first requests share a single worker spin-up.
enum PoolState {
    Uninitialized,
    Ready(WorkerHandle),
    Failed(String),
}

/// Isolation boundary around the embedding model.
///
/// Owns one dedicated worker thread so CPU-bound inference never stalls the
/// caller's scheduler. Requests are multiplexed over a single channel using
/// monotonically increasing correlation ids; a crashed worker fails every
/// pending request and leaves the pool unusable until re-initialized.
///
/// Construct one per process and share it by reference; tests build their own
/// instances with a test-double factory.
pub struct EmbeddingPool {
    state: tokio::sync::Mutex<PoolState>,
    factory: EmbedderFactory,
    next_id: AtomicU64,
    dimensions: usize,
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl EmbeddingPool {
    #[inline]
    pub fn new(dimensions: usize, factory: EmbedderFactory) -> Self {
        Self {
            state: tokio::sync::Mutex::new(PoolState::Uninitialized),
            factory,
            next_id: AtomicU64::new(1),
            dimensions,
        }
    }

    /// Process-wide embedding dimensionality.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a single text. Lazily starts the worker on first use.
    #[inline]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| SemdexError::Embedding("worker returned an empty batch".to_string()))
    }

    /// Embed a batch of texts; output is order-preserving and one-to-one
    /// with the input.
    #[inline]
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.embed_batch_with_progress(texts, None).await
    }

    /// Like [`embed_batch`](Self::embed_batch), reporting partial completion
    /// through `progress` at a bounded cadence.
    #[inline]
    pub async fn embed_batch_with_progress(
        &self,
        texts: Vec<String>,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (request_tx, shared) = self.ensure_ready().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut guard = lock_ignoring_poison(&shared);
            guard.pending.insert(id, response_tx);
            if let Some(callback) = progress {
                guard.progress.insert(id, callback);
            }
        }

        debug!(id, batch = texts.len(), "submitting embedding batch");
        if request_tx.send(WorkerRequest::Embed { id, texts }).is_err() {
            let mut guard = lock_ignoring_poison(&shared);
            guard.pending.remove(&id);
            guard.progress.remove(&id);
            return Err(SemdexError::WorkerExited(
                "embedding worker is no longer accepting requests".to_string(),
            ));
        }

        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(SemdexError::WorkerExited(
                "embedding worker dropped the response channel".to_string(),
            )),
        }
    }

    /// Reset a failed pool back to `Uninitialized` so the next request can
    /// start a fresh worker. Also usable for graceful shutdown of a healthy
    /// worker.
    #[inline]
    pub async fn reinitialize(&self) {
        let mut state = self.state.lock().await;
        if let PoolState::Ready(handle) = &*state {
            let _ = handle.request_tx.send(WorkerRequest::Terminate);
        }
        *state = PoolState::Uninitialized;
        info!("embedding pool reset to uninitialized");
    }

    async fn ensure_ready(&self) -> Result<(mpsc::Sender<WorkerRequest>, Arc<Mutex<Shared>>)> {
        let mut state = self.state.lock().await;

        let mut exited_message = None;
        if let PoolState::Ready(handle) = &*state {
            let status = lock_ignoring_poison(&handle.status).clone();
            match status {
                WorkerStatus::Running => {
                    return Ok((handle.request_tx.clone(), Arc::clone(&handle.shared)));
                }
                WorkerStatus::Exited(message) => exited_message = Some(message),
            }
        }
        if let Some(message) = exited_message {
            warn!("embedding worker found dead: {}", message);
            *state = PoolState::Failed(message.clone());
            return Err(SemdexError::WorkerExited(message));
        }

        if let PoolState::Failed(message) = &*state {
            return Err(SemdexError::WorkerExited(format!(
                "embedding pool is failed and needs re-initialization: {}",
                message
            )));
        }

        // Uninitialized: spin up the worker while holding the state lock so
        // concurrent first requests share this one initialization.
        match self.start_worker().await {
            Ok(handle) => {
                let request_tx = handle.request_tx.clone();
                let shared = Arc::clone(&handle.shared);
                *state = PoolState::Ready(handle);
                Ok((request_tx, shared))
            }
            Err(error) => {
                *state = PoolState::Failed(error.to_string());
                Err(error)
            }
        }
    }

    async fn start_worker(&self) -> Result<WorkerHandle> {
        let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>();
        let (event_tx, event_rx) = async_mpsc::unbounded_channel::<WorkerEvent>();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let status = Arc::new(Mutex::new(WorkerStatus::Running));
        let (init_tx, init_rx) = oneshot::channel::<Result<usize>>();

        let factory = Arc::clone(&self.factory);
        thread::Builder::new()
            .name("semdex-embed".to_string())
            .spawn(move || run_worker(&factory, &request_rx, &event_tx))
            .map_err(|e| {
                SemdexError::Embedding(format!("Failed to spawn embedding worker: {}", e))
            })?;

        tokio::spawn(dispatch_events(
            event_rx,
            Arc::clone(&shared),
            Arc::clone(&status),
            init_tx,
        ));

        match init_rx.await {
            Ok(Ok(dimensions)) => {
                info!(dimensions, "embedding worker initialized");
                Ok(WorkerHandle {
                    request_tx,
                    shared,
                    status,
                })
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(SemdexError::WorkerExited(
                "embedding worker exited during initialization".to_string(),
            )),
        }
    }
}

/// Body of the dedicated worker thread: load the model, then serve batches
/// until terminated. Sends never block; a closed event channel just ends the
/// loop.
fn run_worker(
    factory: &EmbedderFactory,
    request_rx: &mpsc::Receiver<WorkerRequest>,
    event_tx: &async_mpsc::UnboundedSender<WorkerEvent>,
) {
    let _ = event_tx.send(WorkerEvent::Ready);

    let embedder = match factory() {
        Ok(embedder) => embedder,
        Err(error) => {
            let _ = event_tx.send(WorkerEvent::Error {
                id: None,
                message: format!("Embedder initialization failed: {}", error),
            });
            return;
        }
    };
    let dimensions = embedder.dimensions();
    let _ = event_tx.send(WorkerEvent::Initialized { dimensions });

    while let Ok(request) = request_rx.recv() {
        match request {
            WorkerRequest::Embed { id, texts } => {
                let total = texts.len();
                let mut embeddings = Vec::with_capacity(total);
                let mut failed = false;

                for (index, text) in texts.iter().enumerate() {
                    // Empty text maps to a zero vector without touching the
                    // model, keeping the dimensionality invariant.
                    if text.trim().is_empty() {
                        embeddings.push(vec![0.0; dimensions]);
                    } else {
                        match embedder.embed(text) {
                            Ok(embedding) => embeddings.push(embedding),
                            Err(error) => {
                                let _ = event_tx.send(WorkerEvent::Error {
                                    id: Some(id),
                                    message: error.to_string(),
                                });
                                failed = true;
                                break;
                            }
                        }
                    }

                    let completed = index + 1;
                    if completed % PROGRESS_INTERVAL == 0 && completed < total {
                        let _ = event_tx.send(WorkerEvent::Progress {
                            id,
                            current: completed,
                            total,
                        });
                        // Coarser yield so a long batch cannot monopolize
                        // this thread's scheduling slot.
                        thread::sleep(Duration::from_millis(1));
                    } else {
                        thread::yield_now();
                    }
                }

                if !failed {
                    let _ = event_tx.send(WorkerEvent::Result { id, embeddings });
                }
            }
            WorkerRequest::Terminate => break,
        }
    }
}

/// Matches worker events back to pending requests by correlation id. When the
/// worker exits (panic, terminate, or init failure) every still-pending
/// request is rejected with a worker-exited failure.
async fn dispatch_events(
    mut event_rx: async_mpsc::UnboundedReceiver<WorkerEvent>,
    shared: Arc<Mutex<Shared>>,
    status: Arc<Mutex<WorkerStatus>>,
    init_tx: oneshot::Sender<Result<usize>>,
) {
    let mut init_tx = Some(init_tx);

    while let Some(event) = event_rx.recv().await {
        match event {
            WorkerEvent::Ready => debug!("embedding worker channel alive"),
            WorkerEvent::Initialized { dimensions } => {
                if let Some(tx) = init_tx.take() {
                    let _ = tx.send(Ok(dimensions));
                }
            }
            WorkerEvent::Result { id, embeddings } => {
                let sender = {
                    let mut guard = lock_ignoring_poison(&shared);
                    guard.progress.remove(&id);
                    guard.pending.remove(&id)
                };
                match sender {
                    Some(tx) => {
                        let _ = tx.send(Ok(embeddings));
                    }
                    None => warn!(id, "result for unknown correlation id"),
                }
            }
            WorkerEvent::Progress { id, current, total } => {
                let guard = lock_ignoring_poison(&shared);
                if let Some(callback) = guard.progress.get(&id) {
                    callback(current, total);
                }
            }
            WorkerEvent::Error { id: Some(id), message } => {
                let sender = {
                    let mut guard = lock_ignoring_poison(&shared);
                    guard.progress.remove(&id);
                    guard.pending.remove(&id)
                };
                if let Some(tx) = sender {
                    let _ = tx.send(Err(SemdexError::Embedding(message)));
                }
            }
            WorkerEvent::Error { id: None, message } => {
                warn!("embedding worker failed to initialize: {}", message);
                *lock_ignoring_poison(&status) = WorkerStatus::Exited(message.clone());
                if let Some(tx) = init_tx.take() {
                    let _ = tx.send(Err(SemdexError::Embedding(message)));
                }
            }
        }
    }

    // Worker thread gone: drain everything still in flight.
    let message = "embedding worker exited unexpectedly".to_string();
    {
        let mut guard = lock_ignoring_poison(&status);
        if *guard == WorkerStatus::Running {
            *guard = WorkerStatus::Exited(message.clone());
        }
    }
    if let Some(tx) = init_tx.take() {
        let _ = tx.send(Err(SemdexError::WorkerExited(message.clone())));
    }

    let drained: Vec<_> = {
        let mut guard = lock_ignoring_poison(&shared);
        guard.progress.clear();
        guard.pending.drain().collect()
    };
    if !drained.is_empty() {
        warn!(
            pending = drained.len(),
            "rejecting pending embedding requests after worker exit"
        );
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(SemdexError::WorkerExited(message.clone())));
    }
}
