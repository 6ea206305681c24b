//! HTTP handlers for auth-core.

pub mod admin;
pub mod api_keys;
pub mod auth;
pub mod authz;
pub mod metrics;
pub mod well_known;
