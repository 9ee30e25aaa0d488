//! Bounded-concurrency fan-out/fan-in in synchronized waves.
//!
//! Items are cut into consecutive waves of at most `wave_size`. Every item of
//! a wave is dispatched at once and the scheduler waits for the whole wave
//! before starting the next, so no more than `wave_size` external calls are
//! ever in flight. Results come back in input order regardless of completion
//! order.

use crate::error::{Error, Result};
use crate::pipeline::Progress;
use futures::future::try_join_all;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;

/// Partition `len` items into consecutive waves of at most `wave_size`.
///
/// `wave_size` must be non-zero.
pub fn plan_waves(len: usize, wave_size: usize) -> Vec<Range<usize>> {
    assert!(wave_size > 0, "wave size must be non-zero");
    (0..len)
        .step_by(wave_size)
        .map(|start| start..(start + wave_size).min(len))
        .collect()
}

/// Run `worker` over `items` in waves of `wave_size`.
///
/// See [`WaveScheduler::run`].
pub async fn run_waves<T, R, F, Fut>(items: Vec<T>, wave_size: usize, worker: F) -> Result<Vec<R>>
where
    F: FnMut(usize, T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    WaveScheduler::new(wave_size)?.run(items, worker).await
}

/// Dispatches work in barrier-synchronized waves.
#[derive(Debug, Clone)]
pub struct WaveScheduler {
    /// Maximum items in flight at once
    wave_size: usize,

    /// Optional progress counters
    progress: Option<Arc<Progress>>,
}

impl WaveScheduler {
    /// Create a scheduler. A zero wave size is a configuration error.
    pub fn new(wave_size: usize) -> Result<Self> {
        if wave_size == 0 {
            return Err(Error::InvalidConfig("wave size must be > 0".to_string()));
        }
        Ok(Self {
            wave_size,
            progress: None,
        })
    }

    /// Count completed waves in the given progress counters.
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn wave_size(&self) -> usize {
        self.wave_size
    }

    /// Run `worker(index, item)` for every item.
    ///
    /// If any item of a wave fails, the remaining items of that wave are
    /// dropped, no later wave is started, and the error is returned without
    /// partial results.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, mut worker: F) -> Result<Vec<R>>
    where
        F: FnMut(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let total = items.len();
        let waves = plan_waves(total, self.wave_size);
        let mut results = Vec::with_capacity(total);
        let mut items = items.into_iter().enumerate();

        for (wave_idx, range) in waves.iter().enumerate() {
            let batch: Vec<_> = items
                .by_ref()
                .take(range.len())
                .map(|(idx, item)| worker(idx, item))
                .collect();

            tracing::debug!(
                "Dispatching wave {}/{} (items {}..{})",
                wave_idx + 1,
                waves.len(),
                range.start,
                range.end
            );

            let wave_results = try_join_all(batch).await.map_err(|e| {
                tracing::error!("Wave {}/{} failed: {}", wave_idx + 1, waves.len(), e);
                if let Some(progress) = &self.progress {
                    progress.add_failure();
                }
                e
            })?;
            results.extend(wave_results);

            if let Some(progress) = &self.progress {
                progress.add_wave();
            }
        }

        Ok(results)
    }
}
