//! Auth counters. Rendering happens through the Prometheus recorder installed
//! by `service_core::middleware::install_prometheus_recorder`.

use metrics::counter;

use crate::services::error::AuthError;

pub const LOGIN_TOTAL: &str = "auth_login_total";
pub const TOKEN_VERIFY_TOTAL: &str = "auth_token_verify_total";
pub const REFRESH_TOTAL: &str = "auth_refresh_total";
pub const TOKEN_REUSE_DETECTED_TOTAL: &str = "auth_token_reuse_detected_total";
pub const AUTHZ_DECISIONS_TOTAL: &str = "auth_authz_decisions_total";

fn outcome<T>(result: &Result<T, AuthError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind().as_str(),
    }
}

pub fn record_login<T>(result: &Result<T, AuthError>) {
    counter!(LOGIN_TOTAL, "outcome" => outcome(result)).increment(1);
}

pub fn record_verify<T>(result: &Result<T, AuthError>) {
    counter!(TOKEN_VERIFY_TOTAL, "outcome" => outcome(result)).increment(1);
}

pub fn record_refresh<T>(result: &Result<T, AuthError>) {
    counter!(REFRESH_TOTAL, "outcome" => outcome(result)).increment(1);
}

pub fn record_token_reuse() {
    counter!(TOKEN_REUSE_DETECTED_TOTAL).increment(1);
}

pub fn record_decision(allowed: bool) {
    let decision = if allowed { "allow" } else { "deny" };
    counter!(AUTHZ_DECISIONS_TOTAL, "decision" => decision).increment(1);
}
