//! Request statistics aggregation.
//!
//! Requests are aggregated per `(method, grouped name)` and into a single
//! `Aggregated` total. Failures are additionally counted per distinct error
//! message. Both successful and failed requests contribute response times.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::events::{EventListener, RequestEvent};
use crate::percentiles::LatencyHistogram;

/// Name of the row that aggregates all requests.
pub const TOTAL_NAME: &str = "Aggregated";

/// Failures divided by requests.
///
/// With no requests the ratio is 0, unless failures were recorded anyway.
pub fn fail_ratio(num_requests: u64, num_failures: u64) -> f64 {
    if num_requests == 0 {
        if num_failures == 0 {
            0.0
        } else {
            1.0
        }
    } else {
        num_failures as f64 / num_requests as f64
    }
}

#[derive(Debug, Clone)]
struct StatsEntry {
    method: String,
    name: String,
    num_requests: u64,
    num_failures: u64,
    total_response_time_ms: f64,
    min_response_time_ms: Option<f64>,
    max_response_time_ms: f64,
    total_content_length: u64,
    histogram: LatencyHistogram,
}

impl StatsEntry {
    fn new(method: &str, name: &str) -> Self {
        Self {
            method: method.to_string(),
            name: name.to_string(),
            num_requests: 0,
            num_failures: 0,
            total_response_time_ms: 0.0,
            min_response_time_ms: None,
            max_response_time_ms: 0.0,
            total_content_length: 0,
            histogram: LatencyHistogram::new(),
        }
    }

    fn log(&mut self, response_time_ms: f64, content_length: u64, failed: bool) {
        self.num_requests += 1;
        if failed {
            self.num_failures += 1;
        }
        self.total_response_time_ms += response_time_ms;
        self.min_response_time_ms = Some(match self.min_response_time_ms {
            Some(min) => min.min(response_time_ms),
            None => response_time_ms,
        });
        self.max_response_time_ms = self.max_response_time_ms.max(response_time_ms);
        self.total_content_length += content_length;
        self.histogram.record_ms(response_time_ms);
    }

    fn snapshot(&self, elapsed_secs: f64) -> EntrySnapshot {
        let per_request = |total: f64| {
            if self.num_requests == 0 {
                0.0
            } else {
                total / self.num_requests as f64
            }
        };
        let per_second = |count: u64| {
            if elapsed_secs > 0.0 {
                count as f64 / elapsed_secs
            } else {
                0.0
            }
        };

        EntrySnapshot {
            method: self.method.clone(),
            name: self.name.clone(),
            num_requests: self.num_requests,
            num_failures: self.num_failures,
            avg_response_time_ms: per_request(self.total_response_time_ms),
            min_response_time_ms: self.min_response_time_ms.unwrap_or(0.0),
            max_response_time_ms: self.max_response_time_ms,
            median_response_time_ms: self.histogram.value_at_quantile_ms(0.5),
            avg_content_length: per_request(self.total_content_length as f64),
            requests_per_sec: per_second(self.num_requests),
            failures_per_sec: per_second(self.num_failures),
            fail_ratio: fail_ratio(self.num_requests, self.num_failures),
            percentiles_ms: self.histogram.reported_percentiles_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ErrorKey {
    name: String,
    method: String,
    error: String,
}

struct StatsInner {
    // Keyed by (name, method) so snapshots come out sorted by name
    entries: BTreeMap<(String, String), StatsEntry>,
    total: StatsEntry,
    errors: BTreeMap<ErrorKey, u64>,
    start_time: Instant,
}

impl StatsInner {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            total: StatsEntry::new("", TOTAL_NAME),
            errors: BTreeMap::new(),
            start_time: Instant::now(),
        }
    }
}

/// Thread-safe request statistics shared by every simulated user.
pub struct RequestStats {
    inner: Mutex<StatsInner>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one completed request.
    pub fn record(&self, event: &RequestEvent) {
        let method = event.request_type.as_str();
        let response_time_ms = event.response_time_ms();
        let failed = event.is_failure();

        let mut inner = self.lock();
        inner
            .entries
            .entry((event.name.clone(), method.to_string()))
            .or_insert_with(|| StatsEntry::new(method, &event.name))
            .log(response_time_ms, event.response_length, failed);
        inner
            .total
            .log(response_time_ms, event.response_length, failed);

        if let Some(error) = &event.error {
            let key = ErrorKey {
                name: event.name.clone(),
                method: method.to_string(),
                error: error.to_string(),
            };
            *inner.errors.entry(key).or_insert(0) += 1;
        }
    }

    pub fn num_requests(&self) -> u64 {
        self.lock().total.num_requests
    }

    pub fn num_failures(&self) -> u64 {
        self.lock().total.num_failures
    }

    pub fn fail_ratio(&self) -> f64 {
        let inner = self.lock();
        fail_ratio(inner.total.num_requests, inner.total.num_failures)
    }

    /// Clear every entry and restart the measurement window.
    pub fn reset(&self) {
        *self.lock() = StatsInner::new();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        let elapsed_secs = inner.start_time.elapsed().as_secs_f64();

        StatsSnapshot {
            elapsed_secs,
            entries: inner
                .entries
                .values()
                .map(|entry| entry.snapshot(elapsed_secs))
                .collect(),
            total: inner.total.snapshot(elapsed_secs),
            errors: inner
                .errors
                .iter()
                .map(|(key, occurrences)| ErrorSnapshot {
                    method: key.method.clone(),
                    name: key.name.clone(),
                    error: key.error.clone(),
                    occurrences: *occurrences,
                })
                .collect(),
        }
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListener for RequestStats {
    fn on_request(&self, event: &RequestEvent) {
        self.record(event);
    }
}

/// Point-in-time view of one statistics row.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub method: String,
    pub name: String,
    pub num_requests: u64,
    pub num_failures: u64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub median_response_time_ms: f64,
    pub avg_content_length: f64,
    pub requests_per_sec: f64,
    pub failures_per_sec: f64,
    pub fail_ratio: f64,
    /// Values for [`crate::percentiles::REPORTED_PERCENTILES`], in order
    pub percentiles_ms: Vec<f64>,
}

/// Occurrences of one distinct failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSnapshot {
    pub method: String,
    pub name: String,
    pub error: String,
    pub occurrences: u64,
}

/// Point-in-time view of all statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub elapsed_secs: f64,
    pub entries: Vec<EntrySnapshot>,
    pub total: EntrySnapshot,
    pub errors: Vec<ErrorSnapshot>,
}

impl StatsSnapshot {
    pub fn entry(&self, method: &str, name: &str) -> Option<&EntrySnapshot> {
        self.entries
            .iter()
            .find(|e| e.method == method && e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CategorizedError, ErrorCategory};
    use reqwest::Method;
    use std::time::Duration;

    fn ok(name: &str, millis: u64, length: u64) -> RequestEvent {
        RequestEvent {
            request_type: Method::GET,
            name: name.to_string(),
            response_time: Duration::from_millis(millis),
            response_length: length,
            status_code: Some(200),
            error: None,
        }
    }

    fn failed(name: &str, status: u16) -> RequestEvent {
        RequestEvent {
            request_type: Method::GET,
            name: name.to_string(),
            response_time: Duration::from_millis(5),
            response_length: 0,
            status_code: Some(status),
            error: CategorizedError::from_status(status),
        }
    }

    #[test]
    fn test_fail_ratio_edge_cases() {
        assert_eq!(fail_ratio(0, 0), 0.0);
        assert_eq!(fail_ratio(0, 3), 1.0);
        assert_eq!(fail_ratio(200, 1), 0.005);
    }

    #[test]
    fn test_groups_by_name() {
        let stats = RequestStats::new();
        stats.record(&ok("/api/v2/boards/[board_id]/posts", 10, 100));
        stats.record(&ok("/api/v2/boards/[board_id]/posts", 30, 300));
        stats.record(&ok("/api/v2/menus", 20, 50));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.entries.len(), 2);

        let posts = snapshot
            .entry("GET", "/api/v2/boards/[board_id]/posts")
            .unwrap();
        assert_eq!(posts.num_requests, 2);
        assert_eq!(posts.avg_response_time_ms, 20.0);
        assert_eq!(posts.min_response_time_ms, 10.0);
        assert_eq!(posts.max_response_time_ms, 30.0);
        assert_eq!(posts.avg_content_length, 200.0);

        assert_eq!(snapshot.total.name, TOTAL_NAME);
        assert_eq!(snapshot.total.num_requests, 3);
    }

    #[test]
    fn test_entries_sorted_by_name() {
        let stats = RequestStats::new();
        stats.record(&ok("/health", 1, 0));
        stats.record(&ok("/api/v2/menus", 1, 0));

        let names: Vec<String> = stats
            .snapshot()
            .entries
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["/api/v2/menus", "/health"]);
    }

    #[test]
    fn test_failures_counted_and_grouped() {
        let stats = RequestStats::new();
        stats.record(&ok("/health", 3, 2));
        stats.record(&failed("/health", 503));
        stats.record(&failed("/health", 503));
        stats.record(&failed("/api/v2/menus", 404));

        assert_eq!(stats.num_requests(), 4);
        assert_eq!(stats.num_failures(), 3);
        assert_eq!(stats.fail_ratio(), 0.75);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.errors.len(), 2);

        let health_errors = snapshot
            .errors
            .iter()
            .find(|e| e.name == "/health")
            .unwrap();
        assert_eq!(health_errors.occurrences, 2);
        assert_eq!(
            health_errors.error,
            "[server_error] HTTP 503: Service Unavailable"
        );
    }

    #[test]
    fn test_transport_errors_have_no_status() {
        let stats = RequestStats::new();
        let mut event = ok("/health", 1, 0);
        event.status_code = None;
        event.error = Some(CategorizedError::new(
            ErrorCategory::NetworkError,
            "connection refused".to_string(),
        ));
        stats.record(&event);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total.num_failures, 1);
        assert_eq!(snapshot.errors[0].error, "[network_error] connection refused");
    }

    #[test]
    fn test_reset_clears_everything() {
        let stats = RequestStats::new();
        stats.record(&failed("/health", 500));
        stats.reset();

        let snapshot = stats.snapshot();
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.errors.is_empty());
        assert_eq!(snapshot.total.num_requests, 0);
        assert_eq!(snapshot.total.fail_ratio, 0.0);
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = std::sync::Arc::new(RequestStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        stats.record(&ok("/api/v2/menus", 2, 10));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.num_requests(), 4000);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let stats = RequestStats::new();
        stats.record(&ok("/health", 7, 2));
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["total"]["num_requests"], 1);
        assert_eq!(json["entries"][0]["name"], "/health");
    }
}
