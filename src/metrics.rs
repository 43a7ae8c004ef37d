//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chronofeed_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "chronofeed_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Provider Metrics
    pub static ref PROVIDER_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chronofeed_provider_fetches_total", "Total number of provider fetches"),
        &["platform", "outcome"]
    ).expect("metric can be created");
    pub static ref PROVIDER_FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "chronofeed_provider_fetch_duration_seconds",
            "Provider fetch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["platform"]
    ).expect("metric can be created");
    pub static ref CIRCUIT_SKIPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chronofeed_circuit_skips_total", "Fetches skipped because the account circuit was open"),
        &["platform"]
    ).expect("metric can be created");
    pub static ref SNAPSHOT_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chronofeed_snapshot_hits_total", "Account slices served from a snapshot"),
        &["freshness"]
    ).expect("metric can be created");

    // Background Metrics
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chronofeed_background_jobs_total", "Total number of background jobs run"),
        &["kind", "outcome"]
    ).expect("metric can be created");

    // OAuth Metrics
    pub static ref OAUTH_CALLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chronofeed_oauth_callbacks_total", "Total number of OAuth callbacks handled"),
        &["platform", "outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chronofeed_errors_total", "Total number of errors returned to clients"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
            .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(PROVIDER_FETCHES_TOTAL.clone()))
            .expect("PROVIDER_FETCHES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(PROVIDER_FETCH_DURATION_SECONDS.clone()))
            .expect("PROVIDER_FETCH_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(CIRCUIT_SKIPS_TOTAL.clone()))
            .expect("CIRCUIT_SKIPS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SNAPSHOT_HITS_TOTAL.clone()))
            .expect("SNAPSHOT_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(BACKGROUND_JOBS_TOTAL.clone()))
            .expect("BACKGROUND_JOBS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(OAUTH_CALLBACKS_TOTAL.clone()))
            .expect("OAUTH_CALLBACKS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
