// Per-run conversion timing

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Accumulates the first copy and each incremental copy of one run.
///
/// Owned by a single orchestration run; never shared between guests.
#[derive(Debug, Clone, Default)]
pub struct TimingTracker {
    first_copy: Option<Duration>,
    incremental_copies: Vec<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSummary {
    pub first_copy: Duration,
    pub incremental_copies: Vec<Duration>,
    pub total: Duration,
}

impl TimingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first copy time. Later calls are ignored.
    pub fn record_first_copy(&mut self, duration: Duration) {
        match self.first_copy {
            Some(existing) => warn!(
                "First copy time already recorded ({:?}), ignoring {:?}",
                existing, duration
            ),
            None => self.first_copy = Some(duration),
        }
    }

    pub fn record_incremental(&mut self, duration: Duration) {
        self.incremental_copies.push(duration);
    }

    /// Time one incremental pass and append its duration.
    pub async fn measure_incremental<F, T>(&mut self, pass: F) -> T
    where
        F: Future<Output = T>,
    {
        let iteration = self.incremental_copies.len() + 1;
        info!("Incremental copy #{} started...", iteration);
        let start = Instant::now();
        let result = pass.await;
        let duration = start.elapsed();
        self.incremental_copies.push(duration);
        info!("Incremental copy #{} done in: {:?}", iteration, duration);
        result
    }

    pub fn first_copy(&self) -> Option<Duration> {
        self.first_copy
    }

    pub fn incremental_copies(&self) -> &[Duration] {
        &self.incremental_copies
    }

    pub fn summary(&self) -> TimingSummary {
        let first_copy = self.first_copy.unwrap_or_default();
        let total = self
            .incremental_copies
            .iter()
            .fold(first_copy, |acc, d| acc + *d);
        TimingSummary {
            first_copy,
            incremental_copies: self.incremental_copies.clone(),
            total,
        }
    }
}

impl TimingSummary {
    pub fn log(&self) {
        info!("First Block Copy Time: {:?}", self.first_copy);
        for (i, t) in self.incremental_copies.iter().enumerate() {
            info!("Incremental Copy #{}: {:?}", i + 1, t);
        }
        info!("Total Conversion Time: {:?}", self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_first_plus_incrementals() {
        let mut tracker = TimingTracker::new();
        tracker.record_first_copy(Duration::from_secs(10));
        tracker.record_incremental(Duration::from_secs(2));
        tracker.record_incremental(Duration::from_secs(3));
        assert_eq!(tracker.summary().total, Duration::from_secs(15));

        tracker.record_incremental(Duration::from_secs(1));
        let summary = tracker.summary();
        assert_eq!(summary.total, Duration::from_secs(16));
        assert_eq!(
            summary.incremental_copies,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(1)
            ]
        );
    }

    #[test]
    fn test_first_copy_is_set_once() {
        let mut tracker = TimingTracker::new();
        tracker.record_first_copy(Duration::from_secs(10));
        tracker.record_first_copy(Duration::from_secs(99));
        assert_eq!(tracker.first_copy(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_empty_tracker() {
        let summary = TimingTracker::new().summary();
        assert_eq!(summary.total, Duration::ZERO);
        assert!(summary.incremental_copies.is_empty());
    }

    #[tokio::test]
    async fn test_measure_incremental_appends_in_order() {
        let mut tracker = TimingTracker::new();
        tracker.record_first_copy(Duration::from_secs(1));

        let value = tracker
            .measure_incremental(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                42
            })
            .await;
        assert_eq!(value, 42);
        tracker.measure_incremental(async {}).await;

        let copies = tracker.incremental_copies();
        assert_eq!(copies.len(), 2);
        assert!(copies[0] >= Duration::from_millis(20));
        assert_eq!(
            tracker.summary().total,
            Duration::from_secs(1) + copies[0] + copies[1]
        );
    }
}
