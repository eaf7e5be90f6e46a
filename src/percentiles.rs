//! Latency histograms using HDR Histogram.
//!
//! Latencies are stored in microseconds with 3 significant digits between
//! 1μs and 60s. Values outside that range are clamped.

use hdrhistogram::Histogram;
use tracing::warn;

const LOWEST_US: u64 = 1;
const HIGHEST_US: u64 = 60_000_000;

/// Percentiles shown in reports and CSV output.
pub const REPORTED_PERCENTILES: [f64; 11] = [
    0.50, 0.66, 0.75, 0.80, 0.90, 0.95, 0.98, 0.99, 0.999, 0.9999, 1.0,
];

/// Column label for a percentile, e.g. `99.9%`.
pub fn percentile_label(quantile: f64) -> String {
    let pct = quantile * 100.0;
    if (pct - pct.round()).abs() < 1e-9 {
        format!("{}%", pct.round() as u64)
    } else {
        let text = format!("{:.2}", pct);
        format!("{}%", text.trim_end_matches('0'))
    }
}

/// Latency histogram for one statistics entry.
///
/// Not synchronized; the owner guards it.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(LOWEST_US, HIGHEST_US, 3)
            .expect("Failed to create histogram");
        Self { histogram }
    }

    /// Record a latency in (fractional) milliseconds.
    pub fn record_ms(&mut self, latency_ms: f64) {
        let latency_us = (latency_ms * 1000.0).round().max(0.0) as u64;
        let clamped = latency_us.clamp(LOWEST_US, HIGHEST_US);

        if let Err(e) = self.histogram.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Latency at `quantile` (0.0-1.0) in milliseconds, 0 when empty.
    pub fn value_at_quantile_ms(&self, quantile: f64) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        self.histogram.value_at_quantile(quantile) as f64 / 1000.0
    }

    /// Latencies for every [`REPORTED_PERCENTILES`] entry, in milliseconds.
    pub fn reported_percentiles_ms(&self) -> Vec<f64> {
        REPORTED_PERCENTILES
            .iter()
            .map(|q| self.value_at_quantile_ms(*q))
            .collect()
    }

    pub fn reset(&mut self) {
        self.histogram.clear();
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
