//! Prometheus metrics for the quiz pipeline
//!
//! This module tracks:
//! - Scheduler: job claims, lost claims, lease takeovers, outcomes, tick duration
//! - Generation: items kept and items rejected by validation
//! - Delivery: messages sent and failed per render format
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct PipelineMetrics {
    jobs_claimed: Counter,
    claims_lost: Counter,
    leases_reclaimed: Counter,
    jobs_sent: Counter,
    jobs_failed: Counter,
    tick_duration: Histogram,
    items_generated: Counter,
    items_rejected: Counter,
    messages: CounterVec,
}

static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Idempotent. On registration failure the error is returned and every
/// recording function stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = PipelineMetrics {
        jobs_claimed: register_counter!(
            "quizline_jobs_claimed_total",
            "Scheduled jobs claimed by this worker"
        )?,
        claims_lost: register_counter!(
            "quizline_job_claims_lost_total",
            "Claim attempts lost to another worker"
        )?,
        leases_reclaimed: register_counter!(
            "quizline_job_leases_reclaimed_total",
            "Expired leases taken over by this worker"
        )?,
        jobs_sent: register_counter!("quizline_jobs_sent_total", "Scheduled jobs delivered")?,
        jobs_failed: register_counter!("quizline_jobs_failed_total", "Scheduled jobs failed")?,
        tick_duration: register_histogram!(
            "quizline_poll_tick_duration_seconds",
            "Duration of one poll tick"
        )?,
        items_generated: register_counter!(
            "quizline_items_generated_total",
            "Generated items that passed validation"
        )?,
        items_rejected: register_counter!(
            "quizline_items_rejected_total",
            "Generated items dropped by validation"
        )?,
        messages: register_counter_vec!(
            "quizline_messages_total",
            "Delivered messages by format and result",
            &["format", "result"]
        )?,
    };

    PIPELINE_METRICS
        .set(metrics)
        .map_err(|_| "Pipeline metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PIPELINE_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Recording
// ============================================================================

pub fn record_job_claimed() {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.jobs_claimed.inc();
    }
}

pub fn record_claim_lost() {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.claims_lost.inc();
    }
}

pub fn record_leases_reclaimed(count: usize) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.leases_reclaimed.inc_by(count as f64);
    }
}

/// Record a finished job
pub fn record_job_outcome(sent: bool) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };
    if sent {
        m.jobs_sent.inc();
    } else {
        m.jobs_failed.inc();
    }
}

pub fn record_items_generated(count: usize) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.items_generated.inc_by(count as f64);
    }
}

pub fn record_items_rejected(count: usize) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.items_rejected.inc_by(count as f64);
    }
}

/// Record one delivered (or failed) message
pub fn record_message(format: &str, delivered: bool) {
    if let Some(m) = PIPELINE_METRICS.get() {
        let result = if delivered { "delivered" } else { "failed" };
        m.messages.with_label_values(&[format, result]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start timing a poll tick
pub fn start_tick_timer() -> MetricsTimer {
    MetricsTimer {
        timer: PIPELINE_METRICS.get().map(|m| m.tick_duration.start_timer()),
    }
}
