//! Metrics module
//!
//! Prometheus counters for authentication attempts, access outcomes,
//! and decision-service health.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    // Authentication metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "authgate_auth_attempts_total",
        "Authentication attempts",
        &["strategy", "status"]
    ).unwrap();

    // Access-check metrics
    pub static ref ACCESS_OUTCOMES: CounterVec = register_counter_vec!(
        "authgate_access_outcomes_total",
        "Access-check outcomes",
        &["outcome"]
    ).unwrap();

    // Decision-service failures (transport faults, indeterminate verdicts)
    pub static ref DECISION_ERRORS: IntCounter = register_int_counter!(
        "authgate_decision_errors_total",
        "Decision-service errors surfaced as 5xx"
    ).unwrap();

    // HTTP front metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "authgate_requests_total",
        "Requests by endpoint and response status",
        &["endpoint", "status"]
    ).unwrap();
}

/// Record an authentication attempt
pub fn record_auth_attempt(strategy: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS.with_label_values(&[strategy, status]).inc();
}

/// Record the outcome of an access check
pub fn record_access_outcome(outcome: &str) {
    ACCESS_OUTCOMES.with_label_values(&[outcome]).inc();
}

/// Record a decision-service failure
pub fn record_decision_error() {
    DECISION_ERRORS.inc();
}

/// Record a handled request
pub fn record_request(endpoint: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_auth_attempt() {
        record_auth_attempt("bearer", true);
        record_auth_attempt("cookie", false);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_access_outcome() {
        record_access_outcome("permitted");
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_request() {
        record_request("/verify", 200);
        // Just verify it doesn't panic
    }
}
