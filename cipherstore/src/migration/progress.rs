//! Progress estimation across a run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::ordering::MigrationEntry;

/// Maps per-migration progress onto overall run progress.
///
/// Each pending migration is weighted by its minimum expected duration.
/// When every duration is zero, the migrations are weighted equally.
///
/// # Examples
///
/// ```
/// use cipherstore::migration::ProgressEstimator;
/// use std::time::Duration;
///
/// let estimator = ProgressEstimator::from_durations([
///     ("a.m1".to_string(), Duration::from_secs(2)),
///     ("a.m2".to_string(), Duration::from_secs(8)),
/// ]);
/// assert!((estimator.progress("a.m1", 0.5) - 0.10).abs() < 1e-9);
/// assert!((estimator.progress("a.m2", 0.5) - 0.60).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    // key -> (share of the run before this entry, share of this entry)
    spans: HashMap<String, (f64, f64)>,
    total: Duration,
}

impl ProgressEstimator {
    /// Builds an estimator over `entries` in run order.
    #[must_use]
    pub fn new(entries: &[MigrationEntry]) -> Self {
        Self::from_durations(
            entries
                .iter()
                .map(|e| (e.key.clone(), e.expected_duration())),
        )
    }

    /// Builds an estimator from `(key, expected duration)` pairs in run order.
    #[must_use]
    pub fn from_durations(durations: impl IntoIterator<Item = (String, Duration)>) -> Self {
        let durations: Vec<(String, Duration)> = durations.into_iter().collect();
        let total: Duration = durations.iter().map(|(_, d)| *d).sum();
        #[allow(clippy::cast_precision_loss)]
        let count = durations.len() as f64;

        let mut spans = HashMap::with_capacity(durations.len());
        let mut before = 0.0;
        for (key, duration) in durations {
            let share = if total.is_zero() {
                1.0 / count
            } else {
                duration.as_secs_f64() / total.as_secs_f64()
            };
            spans.insert(key, (before, share));
            before += share;
        }
        Self { spans, total }
    }

    /// Sum of all expected durations.
    #[must_use]
    pub const fn total(&self) -> Duration {
        self.total
    }

    /// Overall progress when migration `key` is `fraction` done, clamped to
    /// `[0, 1]`. Unknown keys report 0.
    #[must_use]
    pub fn progress(&self, key: &str, fraction: f64) -> f64 {
        let Some((before, share)) = self.spans.get(key) else {
            return 0.0;
        };
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        (before + fraction * share).clamp(0.0, 1.0)
    }

    /// Expected time left at `progress`.
    #[must_use]
    pub fn remaining(&self, progress: f64) -> Duration {
        self.total.mul_f64((1.0 - progress).clamp(0.0, 1.0))
    }
}

/// Callback receiving `(overall progress, expected time remaining)`.
pub type ProgressCallback = Arc<dyn Fn(f64, Duration) + Send + Sync>;

/// Forwards per-migration progress to the run's progress callback.
pub(crate) struct ProgressReporter {
    estimator: ProgressEstimator,
    on_progress: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub(crate) fn new(estimator: ProgressEstimator, on_progress: Option<ProgressCallback>) -> Self {
        Self {
            estimator,
            on_progress,
        }
    }

    pub(crate) fn report(&self, key: &str, fraction: f64) {
        let progress = self.estimator.progress(key, fraction);
        log::debug!("Migration {key} at {:.0}%, overall {:.0}%", fraction * 100.0, progress * 100.0);
        if let Some(on_progress) = &self.on_progress {
            on_progress(progress, self.estimator.remaining(progress));
        }
    }
}
