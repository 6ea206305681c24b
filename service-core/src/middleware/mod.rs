pub mod metrics;
pub mod rate_limit;
pub mod tracing;

pub use self::metrics::{install_prometheus_recorder, metrics_middleware};
pub use self::rate_limit::{
    IpRateLimiter, KeyedRateLimiter, check_key, client_ip, client_ip_from_parts,
    create_ip_rate_limiter, create_keyed_rate_limiter, ip_rate_limit_middleware,
};
pub use self::tracing::{REQUEST_ID_HEADER, request_id_middleware};
