
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

/// Operation kinds tracked for latency observability. Not on the critical
/// path of correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Extract,
    Chunk,
    Embed,
    StoreWrite,
    Search,
    Generate,
}

impl Operation {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Operation::Extract => "extract",
            Operation::Chunk => "chunk",
            Operation::Embed => "embed",
            Operation::StoreWrite => "store_write",
            Operation::Search => "search",
            Operation::Generate => "generate",
        }
    }
}

/// Latency summary for one operation kind.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSummary {
    pub operation: Operation,
    pub count: usize,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub max: Duration,
}

/// Records latency samples per operation kind.
///
/// An explicitly constructed, owned instance passed to collaborators; tests
/// build their own rather than sharing process-global state.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    samples: Mutex<HashMap<Operation, Vec<Duration>>>,
}

impl MetricsRecorder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self, operation: Operation, elapsed: Duration) {
        debug!(op = operation.name(), ?elapsed, "recorded latency sample");
        let mut samples = self
            .samples
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        samples.entry(operation).or_default().push(elapsed);
    }

    /// Summaries for every operation with at least one sample, in stable
    /// name order.
    #[inline]
    pub fn snapshot(&self) -> Vec<OperationSummary> {
        let samples = self
            .samples
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut summaries: Vec<OperationSummary> = samples
            .iter()
            .filter(|(_, durations)| !durations.is_empty())
            .map(|(&operation, durations)| summarize(operation, durations))
            .collect();
        summaries.sort_by_key(|summary| summary.operation.name());
        summaries
    }
}

fn summarize(operation: Operation, durations: &[Duration]) -> OperationSummary {
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();

    let total: Duration = sorted.iter().sum();
    let count = sorted.len();

    OperationSummary {
        operation,
        count,
        mean: total / count as u32,
        p50: percentile(&sorted, 0.50),
        p95: percentile(&sorted, 0.95),
        max: sorted[count - 1],
    }
}

/// Nearest-rank percentile over an already-sorted sample set.
fn percentile(sorted: &[Duration], fraction: f64) -> Duration {
    let rank = ((sorted.len() as f64 * fraction).ceil() as usize)
        .clamp(1, sorted.len());
    sorted[rank - 1]
}
