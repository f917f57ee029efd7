//! Synchronized statistics accumulators shared across concurrent item tasks
//!
//! One [`StatsHandle`] and one [`ObservationsHandle`] are owned by each
//! `process_queue` invocation and mutated in place by every item task within
//! a chunk, across retry rounds. The original single-threaded design relied
//! on event-loop semantics for safe unsynchronized increments; on a
//! multi-threaded runtime every mutation goes through a mutex so the
//! invariant `successful + failed <= total` holds under true parallelism.

use crate::types::{FailureReason, QueueReport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mutable aggregate of download outcomes for one queue invocation
#[derive(Clone, Debug, Default)]
pub struct DownloadStats {
    /// Total number of URLs handed to the queue
    pub total: u64,
    /// Images saved to disk
    pub successful: u64,
    /// Permanently failed URLs
    pub failed: u64,
    /// The permanently failed URLs themselves
    pub failed_urls: Vec<String>,
    /// Saved-image counts keyed by final on-disk format
    pub format_counts: HashMap<String, u64>,
}

/// Running counters of analysis outcomes, aggregated across retry rounds
#[derive(Clone, Debug, Default)]
pub struct AnalysisObservations {
    /// Valid analysis outcomes
    pub analyzed: u64,
    /// Failure counts keyed by reason (every occurrence, including ones
    /// that were later retried successfully)
    pub analysis_failures: HashMap<FailureReason, u64>,
    /// URLs whose final failure was an analysis failure
    pub analysis_failed_urls: Vec<String>,
    /// Metadata parse errors tolerated under lenient validation
    pub metadata_parse_error_continue: u64,
}

/// Cloneable, mutex-guarded handle to the shared [`DownloadStats`]
#[derive(Clone, Debug)]
pub struct StatsHandle {
    inner: Arc<Mutex<DownloadStats>>,
}

impl StatsHandle {
    /// Create a fresh accumulator for `total` URLs
    pub fn new(total: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DownloadStats {
                total: total as u64,
                ..DownloadStats::default()
            })),
        }
    }

    /// Record one saved image under its final on-disk format key
    pub fn record_success(&self, final_format: &str) {
        let mut stats = self.lock();
        stats.successful += 1;
        *stats.format_counts.entry(final_format.to_string()).or_insert(0) += 1;
    }

    /// Record one permanently failed URL
    pub fn record_failure(&self, url: &str) {
        let mut stats = self.lock();
        stats.failed += 1;
        stats.failed_urls.push(url.to_string());
    }

    /// Snapshot the current aggregate
    pub fn snapshot(&self) -> DownloadStats {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DownloadStats> {
        // A poisoned stats mutex means an item task panicked while holding
        // the guard; the counters themselves are still usable.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Cloneable, mutex-guarded handle to the shared [`AnalysisObservations`]
#[derive(Clone, Debug, Default)]
pub struct ObservationsHandle {
    inner: Arc<Mutex<AnalysisObservations>>,
}

impl ObservationsHandle {
    /// Create an empty observations accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one valid analysis outcome
    pub fn record_analyzed(&self) {
        self.lock().analyzed += 1;
    }

    /// Bump the counter for one analysis failure occurrence
    pub fn record_failure(&self, reason: FailureReason) {
        *self.lock().analysis_failures.entry(reason).or_insert(0) += 1;
    }

    /// Record a URL whose final, non-retried failure was an analysis failure
    pub fn record_failed_url(&self, url: &str) {
        self.lock().analysis_failed_urls.push(url.to_string());
    }

    /// Record one tolerated metadata parse error (lenient validation)
    pub fn record_parse_error_continue(&self) {
        self.lock().metadata_parse_error_continue += 1;
    }

    /// Snapshot the current counters
    pub fn snapshot(&self) -> AnalysisObservations {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnalysisObservations> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Merge the two accumulators into the caller-facing report
pub fn build_report(stats: &StatsHandle, observations: &ObservationsHandle) -> QueueReport {
    let stats = stats.snapshot();
    let obs = observations.snapshot();
    QueueReport {
        analyzed: obs.analyzed,
        analysis_failures: obs.analysis_failures,
        analysis_failed_urls: obs.analysis_failed_urls,
        metadata_parse_error_continue: obs.metadata_parse_error_continue,
        format_counts: stats.format_counts,
        successful: stats.successful,
        failed: stats.failed,
        failed_urls: stats.failed_urls,
    }
}
