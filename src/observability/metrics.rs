//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `secret_sync_reconcile_total` - Total number of reconciliations
//! - `secret_sync_reconcile_errors_total` - Reconciliation errors by classified reason
//! - `secret_sync_reconcile_duration_seconds` - Duration of reconciliation operations
//! - `secret_sync_admission_policy_denials_total` - Apply denials by admission policy name

use std::sync::LazyLock;

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use regex::Regex;
use tracing::debug;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_sync_reconcile_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILE_TOTAL metric - this should never happen")
});

static RECONCILE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_sync_reconcile_errors_total",
            "Total number of reconciliation errors by classified reason",
        ),
        &["reason"],
    )
    .expect("Failed to create RECONCILE_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "secret_sync_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILE_DURATION metric - this should never happen")
});

static ADMISSION_POLICY_DENIALS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_sync_admission_policy_denials_total",
            "Total number of Secret applies denied by a validating admission policy",
        ),
        &["policy"],
    )
    .expect("Failed to create ADMISSION_POLICY_DENIALS_TOTAL metric - this should never happen")
});

/// Admission denials carry the policy name in the API server error text.
static ADMISSION_POLICY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ValidatingAdmissionPolicy '([^']*)'").expect("admission policy regex is valid")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILE_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILE_DURATION.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_POLICY_DENIALS_TOTAL.clone()))?;

    Ok(())
}

pub fn inc_reconciliations() {
    RECONCILE_TOTAL.inc();
}

pub fn inc_reconcile_errors(reason: &str) {
    RECONCILE_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn observe_reconcile_duration(duration: f64) {
    RECONCILE_DURATION.observe(duration);
}

/// Count an apply rejection against the admission policy that produced it.
/// Errors without a recognizable policy name are ignored.
pub fn observe_admission_denial(error_message: &str) {
    match ADMISSION_POLICY_RE
        .captures(error_message)
        .and_then(|captures| captures.get(1))
    {
        Some(policy) => {
            ADMISSION_POLICY_DENIALS_TOTAL
                .with_label_values(&[policy.as_str()])
                .inc();
        }
        None => {
            debug!(error_message, "Unable to parse admission policy name from error");
        }
    }
}
