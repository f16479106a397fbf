//! Prometheus metrics for report submissions
//!
//! Two series, scraped from `/metrics` on the probe server:
//! - `requests_total{status}` - submissions by outcome (`success`, `failed`)
//! - `request_processing_seconds` - wall time of one submission attempt

use std::time::{Duration, Instant};

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Outcome label for a successful submission
pub const STATUS_SUCCESS: &str = "success";
/// Outcome label for a failed submission attempt
pub const STATUS_FAILED: &str = "failed";

/// Buckets cover three sequential calls each bounded by the request timeout
const PROCESSING_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0];

/// Submission counters and timings
#[derive(Clone)]
pub struct SubmissionMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_processing_seconds: Histogram,
}

impl SubmissionMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics and register them on `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total number of report submissions"),
            &["status"],
        )?;
        let request_processing_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "request_processing_seconds",
                "Time spent processing a report submission",
            )
            .buckets(PROCESSING_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_processing_seconds.clone()))?;

        // Pre-create both label values so they scrape as zero
        requests_total.with_label_values(&[STATUS_SUCCESS]);
        requests_total.with_label_values(&[STATUS_FAILED]);

        Ok(Self {
            registry,
            requests_total,
            request_processing_seconds,
        })
    }

    /// Start timing a submission attempt
    pub fn start(&self) -> SubmissionTimer<'_> {
        SubmissionTimer {
            metrics: self,
            start: Instant::now(),
        }
    }

    /// Record a finished submission attempt
    pub fn record(&self, status: &str, elapsed: Duration) {
        self.requests_total.with_label_values(&[status]).inc();
        self.request_processing_seconds
            .observe(elapsed.as_secs_f64());
    }

    /// Count of submissions recorded with the given status
    pub fn count(&self, status: &str) -> u64 {
        self.requests_total.with_label_values(&[status]).get()
    }

    /// Render all registered metrics in Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Times one submission attempt; finish with [`success`](Self::success) or
/// [`failed`](Self::failed)
pub struct SubmissionTimer<'a> {
    metrics: &'a SubmissionMetrics,
    start: Instant,
}

impl SubmissionTimer<'_> {
    /// Record the attempt as successful
    pub fn success(self) {
        self.metrics.record(STATUS_SUCCESS, self.start.elapsed());
    }

    /// Record the attempt as failed
    pub fn failed(self) {
        self.metrics.record(STATUS_FAILED, self.start.elapsed());
    }
}
