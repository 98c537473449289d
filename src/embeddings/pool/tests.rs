use super::*;
use crate::embeddings::{Embedder, HashEmbedder};
use std::sync::atomic::AtomicUsize;

/// Counts model invocations and panics on a magic input, standing in for a
/// crashing inference runtime.
struct FlakyEmbedder {
    dimensions: usize,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl Embedder for FlakyEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text == "::crash::" {
            panic!("simulated inference crash");
        }
        std::thread::sleep(self.delay);
        HashEmbedder::new(self.dimensions).embed(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn hash_pool(dimensions: usize) -> EmbeddingPool {
    EmbeddingPool::new(
        dimensions,
        Arc::new(move || Ok(Box::new(HashEmbedder::new(dimensions)) as Box<dyn Embedder>)),
    )
}

fn flaky_pool(dimensions: usize, calls: Arc<AtomicUsize>, delay: Duration) -> EmbeddingPool {
    EmbeddingPool::new(
        dimensions,
        Arc::new(move || {
            Ok(Box::new(FlakyEmbedder {
                dimensions,
                calls: Arc::clone(&calls),
                delay,
            }) as Box<dyn Embedder>)
        }),
    )
}

#[tokio::test]
async fn batch_output_preserves_input_order() {
    let pool = hash_pool(32);
    let texts = vec![
        "alpha".to_string(),
        "bravo".to_string(),
        "charlie".to_string(),
    ];
    let embeddings = pool.embed_batch(texts.clone()).await.expect("should embed");

    assert_eq!(embeddings.len(), 3);
    let reference = HashEmbedder::new(32);
    for (text, embedding) in texts.iter().zip(&embeddings) {
        let expected = reference.embed(text).expect("should embed");
        assert_eq!(embedding, &expected, "result for '{text}' out of position");
    }
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pool = flaky_pool(16, Arc::clone(&calls), Duration::ZERO);

    let embeddings = pool.embed_batch(Vec::new()).await.expect("should succeed");
    assert!(embeddings.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no worker started");
}

#[tokio::test]
async fn empty_text_maps_to_zero_vector_without_model_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pool = flaky_pool(16, Arc::clone(&calls), Duration::ZERO);

    let embeddings = pool
        .embed_batch(vec!["".to_string(), "   ".to_string(), "real".to_string()])
        .await
        .expect("should embed");

    assert_eq!(embeddings[0], vec![0.0; 16]);
    assert_eq!(embeddings[1], vec![0.0; 16]);
    assert_ne!(embeddings[2], vec![0.0; 16]);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "only the non-empty text hits the model");
}

#[tokio::test]
async fn concurrent_batches_are_matched_by_correlation_id() {
    let pool = Arc::new(hash_pool(32));
    let first = vec!["one".to_string(), "two".to_string()];
    let second = vec!["three".to_string()];

    let (a, b) = tokio::join!(
        pool.embed_batch(first.clone()),
        pool.embed_batch(second.clone())
    );
    let a = a.expect("first batch should embed");
    let b = b.expect("second batch should embed");

    let reference = HashEmbedder::new(32);
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0], reference.embed("one").expect("should embed"));
    assert_eq!(b[0], reference.embed("three").expect("should embed"));
}

#[tokio::test]
async fn progress_fires_at_bounded_cadence() {
    let pool = hash_pool(16);
    let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let texts: Vec<String> = (0..20).map(|i| format!("text number {i}")).collect();
    pool.embed_batch_with_progress(
        texts,
        Some(Box::new(move |current, total| {
            seen_clone
                .lock()
                .expect("progress log lock")
                .push((current, total));
        })),
    )
    .await
    .expect("should embed");

    // Dispatcher delivers progress before the final result on the same
    // channel, so by now everything observable has been observed.
    let events = seen.lock().expect("progress log lock").clone();
    assert_eq!(events, vec![(8, 20), (16, 20)]);
}

#[tokio::test]
async fn worker_crash_rejects_all_pending_requests() {
    let calls = Arc::new(AtomicUsize::new(0));
    // Slow enough that requests 2 and 3 are still queued when 1 crashes.
    let pool = Arc::new(flaky_pool(16, calls, Duration::from_millis(20)));

    let (one, two, three) = tokio::join!(
        pool.embed_batch(vec!["::crash::".to_string()]),
        pool.embed_batch(vec!["second".to_string()]),
        pool.embed_batch(vec!["third".to_string()]),
    );

    for (name, result) in [("one", one), ("two", two), ("three", three)] {
        match result {
            Err(SemdexError::WorkerExited(_)) => {}
            other => panic!("request {name} should fail with worker exited, got {other:?}"),
        }
    }

    // Pool stays unusable until explicitly re-initialized.
    let after = pool.embed("still broken?").await;
    assert!(matches!(after, Err(SemdexError::WorkerExited(_))));
}

#[tokio::test]
async fn reinitialize_recovers_a_failed_pool() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pool = flaky_pool(16, calls, Duration::ZERO);

    let crashed = pool.embed("::crash::").await;
    assert!(matches!(crashed, Err(SemdexError::WorkerExited(_))));

    pool.reinitialize().await;

    let embedding = pool.embed("recovered").await.expect("should embed again");
    assert_eq!(embedding.len(), 16);
}

#[tokio::test]
async fn initialization_failure_is_reported_not_retried() {
    let pool = EmbeddingPool::new(
        16,
        Arc::new(|| anyhow::bail!("model weights missing")),
    );

    let result = pool.embed("anything").await;
    match result {
        Err(SemdexError::Embedding(message)) => {
            assert!(message.contains("model weights missing"));
        }
        other => panic!("expected initialization error, got {other:?}"),
    }

    // Subsequent requests see the failed state rather than respawning.
    let again = pool.embed("anything").await;
    assert!(matches!(again, Err(SemdexError::WorkerExited(_))));
}

#[tokio::test]
async fn single_embed_matches_batch_of_one() {
    let pool = hash_pool(32);
    let single = pool.embed("same text").await.expect("should embed");
    let mut batch = pool
        .embed_batch(vec!["same text".to_string()])
        .await
        .expect("should embed");
    assert_eq!(Some(single), batch.pop());
}
