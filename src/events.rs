//! Request and shutdown event hooks.
//!
//! Every completed request (successful or not) is published to all registered
//! listeners as a [`RequestEvent`]. When the run ends, each listener gets the
//! final statistics and may fail the run.

use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::errors::CategorizedError;
use crate::stats::StatsSnapshot;

/// A completed request.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request_type: Method,

    /// Grouped statistics name, e.g. `/api/v2/boards/[board_id]/posts`
    pub name: String,

    /// Time from sending the request until the body was fully read
    pub response_time: Duration,

    /// Body size in bytes
    pub response_length: u64,

    /// Status code, absent when no response was received
    pub status_code: Option<u16>,

    pub error: Option<CategorizedError>,
}

impl RequestEvent {
    pub fn response_time_ms(&self) -> f64 {
        self.response_time.as_nanos() as f64 / 1_000_000.0
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of the end-of-run checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Receives request and shutdown events.
pub trait EventListener: Send + Sync {
    fn on_request(&self, _event: &RequestEvent) {}

    fn on_quitting(&self, _stats: &StatsSnapshot) -> Verdict {
        Verdict::Pass
    }
}

/// Ordered set of listeners.
#[derive(Clone, Default)]
pub struct EventHooks {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn fire_request(&self, event: &RequestEvent) {
        for listener in &self.listeners {
            listener.on_request(event);
        }
    }

    /// Runs every listener, even after one has failed.
    pub fn fire_quitting(&self, stats: &StatsSnapshot) -> Verdict {
        let mut verdict = Verdict::Pass;
        for listener in &self.listeners {
            if listener.on_quitting(stats) == Verdict::Fail {
                verdict = Verdict::Fail;
            }
        }
        verdict
    }
}

/// Warns about requests slower than a threshold.
#[derive(Debug, Clone)]
pub struct SlowRequestLogger {
    threshold: Duration,
}

impl SlowRequestLogger {
    pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(1000);

    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn is_slow(&self, event: &RequestEvent) -> bool {
        event.response_time > self.threshold
    }
}

impl Default for SlowRequestLogger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl EventListener for SlowRequestLogger {
    fn on_request(&self, event: &RequestEvent) {
        if self.is_slow(event) {
            let response_time_ms = event.response_time_ms();
            warn!(
                name = %event.name,
                response_time_ms = response_time_ms,
                threshold_ms = self.threshold.as_millis() as u64,
                "Slow request: {} took {:.2}ms",
                event.name,
                response_time_ms
            );
        }
    }
}

/// Fails the run when the overall failure ratio is too high.
#[derive(Debug, Clone)]
pub struct FailRatioGuard {
    max_ratio: f64,
}

impl FailRatioGuard {
    pub const DEFAULT_MAX_RATIO: f64 = 0.01;

    pub fn new(max_ratio: f64) -> Self {
        Self { max_ratio }
    }
}

impl Default for FailRatioGuard {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RATIO)
    }
}

impl EventListener for FailRatioGuard {
    fn on_quitting(&self, stats: &StatsSnapshot) -> Verdict {
        let fail_ratio = stats.total.fail_ratio;
        if fail_ratio > self.max_ratio {
            error!(
                fail_ratio = fail_ratio,
                max_fail_ratio = self.max_ratio,
                requests = stats.total.num_requests,
                failures = stats.total.num_failures,
                "Test failed: {:.2}% failure rate",
                fail_ratio * 100.0
            );
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }
}
