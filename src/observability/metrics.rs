//! Metrics for the roster geocoding pipeline
//!
//! Metric names live in one enum so call sites never spell them out. A
//! Prometheus recorder is installed in-process; short-lived runs render a
//! text snapshot at the end instead of being scraped.

use std::fmt;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Enum representing all metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Geocoding metrics
    GeocodeRequestsSuccess,
    GeocodeRequestsRejected,
    GeocodeRequestsError,
    GeocodeRecordsSkipped,
    GeocodeRequestDuration,

    // Attribution metrics
    AttributionMatches,
    AttributionUnmatched,
    AttributionLayerFeatures,

    // Branch metrics
    BranchAssigned,
    BranchFallback,

    // Run metrics
    PipelineRuns,
    PipelinePartialRuns,
    PipelineDuration,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::GeocodeRequestsSuccess => "roster_geocode_requests_success_total",
            MetricName::GeocodeRequestsRejected => "roster_geocode_requests_rejected_total",
            MetricName::GeocodeRequestsError => "roster_geocode_requests_error_total",
            MetricName::GeocodeRecordsSkipped => "roster_geocode_records_skipped_total",
            MetricName::GeocodeRequestDuration => "roster_geocode_request_duration_seconds",

            MetricName::AttributionMatches => "roster_attribution_matches_total",
            MetricName::AttributionUnmatched => "roster_attribution_unmatched_total",
            MetricName::AttributionLayerFeatures => "roster_attribution_layer_features",

            MetricName::BranchAssigned => "roster_branch_assigned_total",
            MetricName::BranchFallback => "roster_branch_fallback_total",

            MetricName::PipelineRuns => "roster_pipeline_runs_total",
            MetricName::PipelinePartialRuns => "roster_pipeline_partial_runs_total",
            MetricName::PipelineDuration => "roster_pipeline_duration_seconds",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            GeocodeRequestsSuccess,
            GeocodeRequestsRejected,
            GeocodeRequestsError,
            GeocodeRecordsSkipped,
            GeocodeRequestDuration,
            AttributionMatches,
            AttributionUnmatched,
            AttributionLayerFeatures,
            BranchAssigned,
            BranchFallback,
            PipelineRuns,
            PipelinePartialRuns,
            PipelineDuration,
        ]
        .into_iter()
    }
}

static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the in-process Prometheus recorder. Idempotent.
pub fn init() {
    if HANDLE.get().is_some() {
        return;
    }
    match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
            info!("Metrics recorder installed");
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
        }
    }
}

/// Prometheus text snapshot of everything recorded so far
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Geocoding Metrics
// ============================================================================

pub mod geocode {
    use super::MetricName;

    pub fn request_success() {
        ::metrics::counter!(MetricName::GeocodeRequestsSuccess.as_str()).increment(1);
    }

    /// Provider answered with a non-success status
    pub fn request_rejected(status: &str) {
        ::metrics::counter!(MetricName::GeocodeRequestsRejected.as_str(), "status" => status.to_string())
            .increment(1);
    }

    /// The call itself failed; the run stops after this
    pub fn request_error() {
        ::metrics::counter!(MetricName::GeocodeRequestsError.as_str()).increment(1);
    }

    /// Records already geocoded by an earlier run
    pub fn records_skipped(count: usize) {
        ::metrics::counter!(MetricName::GeocodeRecordsSkipped.as_str()).increment(count as u64);
    }

    pub fn request_duration(secs: f64) {
        ::metrics::histogram!(MetricName::GeocodeRequestDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Attribution Metrics
// ============================================================================

pub mod attribution {
    use super::MetricName;

    pub fn layer_loaded(layer: &str, features: usize) {
        ::metrics::gauge!(MetricName::AttributionLayerFeatures.as_str(), "layer" => layer.to_string())
            .set(features as f64);
    }

    pub fn layer_attributed(layer: &str, matched: usize, unmatched: usize) {
        ::metrics::counter!(MetricName::AttributionMatches.as_str(), "layer" => layer.to_string())
            .increment(matched as u64);
        ::metrics::counter!(MetricName::AttributionUnmatched.as_str(), "layer" => layer.to_string())
            .increment(unmatched as u64);
    }
}

// ============================================================================
// Branch Metrics
// ============================================================================

pub mod branch {
    use super::MetricName;

    pub fn tagged(assigned: usize, fallback: usize) {
        ::metrics::counter!(MetricName::BranchAssigned.as_str()).increment(assigned as u64);
        ::metrics::counter!(MetricName::BranchFallback.as_str()).increment(fallback as u64);
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod pipeline {
    use super::MetricName;

    pub fn run_started() {
        ::metrics::counter!(MetricName::PipelineRuns.as_str()).increment(1);
    }

    pub fn run_partial() {
        ::metrics::counter!(MetricName::PipelinePartialRuns.as_str()).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::PipelineDuration.as_str()).record(secs);
    }
}
