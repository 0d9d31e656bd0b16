use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, TextEncoder};

/// Report submissions by outcome (`accepted` or the rejection kind)
pub static REPORT_SUBMISSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "pothole_report_submissions_total",
            "Report submissions by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create pothole_report_submissions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register pothole_report_submissions_total");
    counter
});

/// Review decisions actually applied, by resulting status
pub static REVIEW_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("pothole_review_decisions_total", "Applied review decisions"),
        &["decision"],
    )
    .expect("failed to create pothole_review_decisions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register pothole_review_decisions_total");
    counter
});

pub static POINTS_AWARDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "pothole_points_awarded_total",
        "Points credited for approved reports",
    )
    .expect("failed to create pothole_points_awarded_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register pothole_points_awarded_total");
    counter
});

/// Redemption lifecycle events: requested, approved, rejected, incomplete
pub static REDEMPTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("pothole_redemptions_total", "Redemption requests by outcome"),
        &["outcome"],
    )
    .expect("failed to create pothole_redemptions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register pothole_redemptions_total");
    counter
});

static PAYOUT_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "pothole_payout_duration_seconds",
            "Latency of airtime payout calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("failed to create pothole_payout_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register pothole_payout_duration_seconds");
    histogram
});

pub fn record_submission(outcome: &str) {
    REPORT_SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_review(decision: &str) {
    REVIEW_DECISIONS_TOTAL.with_label_values(&[decision]).inc();
}

pub fn record_redemption(outcome: &str) {
    REDEMPTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn observe_payout(elapsed: Duration) {
    PAYOUT_DURATION_SECONDS.observe(elapsed.as_secs_f64());
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
