use std::time::Duration;

use serde::Serialize;
use tracing::info;

/// Snapshot taken after each chunk of an import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub total_batches: usize,
    pub processed: usize,
    pub total: usize,
    /// Items per second since the job started.
    pub throughput: f64,
    pub eta_secs: Option<f64>,
    pub elapsed_ms: u64,
}

impl BatchProgress {
    pub fn compute(
        batch_index: usize,
        total_batches: usize,
        processed: usize,
        total: usize,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };
        let remaining = total.saturating_sub(processed);
        let eta_secs = if remaining == 0 {
            Some(0.0)
        } else if throughput > 0.0 {
            Some(remaining as f64 / throughput)
        } else {
            None
        };

        Self {
            batch_index,
            total_batches,
            processed,
            total,
            throughput,
            eta_secs,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressEvent {
    Started { total: usize, total_batches: usize },
    Batch(BatchProgress),
    Finished { processed: usize, cancelled: bool },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Emits each event as a structured log line.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                total,
                total_batches,
            } => info!(total, total_batches, "import started"),
            ProgressEvent::Batch(progress) => info!(
                batch = progress.batch_index + 1,
                of = progress.total_batches,
                processed = progress.processed,
                total = progress.total,
                throughput = progress.throughput,
                eta_secs = progress.eta_secs.map(|eta| eta.round() as u64),
                "batch complete"
            ),
            ProgressEvent::Finished {
                processed,
                cancelled,
            } => info!(processed, cancelled, "import finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::BatchProgress;

    #[test]
    fn eta_follows_throughput() {
        let progress = BatchProgress::compute(0, 4, 25, 100, Duration::from_secs(5));
        assert_eq!(progress.throughput, 5.0);
        assert_eq!(progress.eta_secs, Some(15.0));

        let done = BatchProgress::compute(3, 4, 100, 100, Duration::from_secs(20));
        assert_eq!(done.eta_secs, Some(0.0));

        let instant = BatchProgress::compute(0, 1, 0, 10, Duration::ZERO);
        assert_eq!(instant.eta_secs, None);
    }
}
