//! Live progress counters and periodic reporting.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters for a running orchestration.
#[derive(Debug, Default)]
pub struct Progress {
    /// Summarization calls planned so far (grows as levels are formed)
    pub calls_planned: AtomicU64,

    /// Summarization calls completed against the backend
    pub calls_completed: AtomicU64,

    /// Nodes reused from the journal instead of being summarized again
    pub calls_replayed: AtomicU64,

    /// Waves that passed their barrier
    pub waves_completed: AtomicU64,

    /// Retries after transient failures
    pub retries: AtomicU64,

    /// Calls that failed for good
    pub failures: AtomicU64,

    /// Prompt tokens reported by the backend
    pub prompt_tokens: AtomicU64,

    /// Completion tokens reported by the backend
    pub completion_tokens: AtomicU64,

    /// Start time
    start_time: Option<Instant>,
}

impl Progress {
    /// Create new counters.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_planned(&self, calls: u64) {
        self.calls_planned.fetch_add(calls, Ordering::Relaxed);
    }

    /// Record a completed call and its reported token usage.
    pub fn add_completed(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.calls_completed.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion_tokens, Ordering::Relaxed);
    }

    pub fn add_replayed(&self) {
        self.calls_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_wave(&self) {
        self.waves_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get completed calls per second.
    pub fn calls_per_second(&self) -> f64 {
        let calls = self.calls_completed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            calls as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            calls_planned: self.calls_planned.load(Ordering::Relaxed),
            calls_completed: self.calls_completed.load(Ordering::Relaxed),
            calls_replayed: self.calls_replayed.load(Ordering::Relaxed),
            waves_completed: self.waves_completed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            calls_per_second: self.calls_per_second(),
        }
    }
}

/// Snapshot of progress at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub calls_planned: u64,
    pub calls_completed: u64,
    pub calls_replayed: u64,
    pub waves_completed: u64,
    pub retries: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub calls_per_second: f64,
}

impl ProgressSnapshot {
    /// Fraction of planned calls that are done, as a percentage.
    pub fn percent_done(&self) -> f64 {
        if self.calls_planned > 0 {
            (self.calls_completed + self.calls_replayed) as f64 / self.calls_planned as f64 * 100.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Calls: {} done, {} replayed, {} planned | Waves: {} | \
             Tokens: {} prompt, {} completion | Retries: {} | Failures: {} | \
             Rate: {:.2} calls/s | Elapsed: {:.1}s",
            self.calls_completed,
            self.calls_replayed,
            self.calls_planned,
            self.waves_completed,
            self.prompt_tokens,
            self.completion_tokens,
            self.retries,
            self.failures,
            self.calls_per_second,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic progress reporter.
pub struct ProgressReporter {
    progress: Arc<Progress>,
    interval_secs: u64,
}

impl ProgressReporter {
    pub fn new(progress: Arc<Progress>, interval_secs: u64) -> Self {
        Self {
            progress,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Log a progress line every interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.progress.snapshot();
                    tracing::info!("[{:.1}%] {}", snapshot.percent_done(), snapshot);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Final: {}", self.progress.snapshot());
                    break;
                }
            }
        }
    }
}
