// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any installed recorder can collect these.
//! Nothing is recorded anywhere unless the host installs one.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all nearby metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "nearby_api_calls_total",
        "Routing API calls made, by category"
    );
    describe_counter!(
        "nearby_items_processed_total",
        "Queue items handled by the batch processor, by outcome"
    );
    describe_gauge!("nearby_queue_pending", "Pending queue items");
    describe_histogram!(
        "nearby_recompute_seconds",
        "Wall time of one recompute run in seconds"
    );
}

/// Record one queue item leaving the batch processor.
pub fn record_item(outcome: &'static str) {
    metrics::counter!("nearby_items_processed_total", "outcome" => outcome).increment(1);
}

pub fn set_queue_pending(count: u64) {
    metrics::gauge!("nearby_queue_pending").set(count as f64);
}

pub fn record_recompute_latency(seconds: f64) {
    metrics::histogram!("nearby_recompute_seconds").record(seconds);
}
