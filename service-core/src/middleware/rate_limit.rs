use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    hash::Hash,
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by an arbitrary hashable key
pub type KeyedRateLimiter<K> = Arc<RateLimiter<K, DashMapStateStore<K>, DefaultClock>>;

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = KeyedRateLimiter<IpAddr>;

fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds * 1000) / u64::from(burst.get()));
    Quota::with_period(period)
        .map(|q| q.allow_burst(burst))
        .unwrap_or_else(|| Quota::per_second(burst))
}

/// `attempts` requests per `window_seconds`, replenished evenly across the window.
pub fn create_keyed_rate_limiter<K>(attempts: u32, window_seconds: u64) -> KeyedRateLimiter<K>
where
    K: Hash + Eq + Clone,
{
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    create_keyed_rate_limiter(attempts, window_seconds)
}

/// Consume one cell for `key`. On rejection returns the seconds until the
/// next cell is available (at least 1).
pub fn check_key<K>(limiter: &KeyedRateLimiter<K>, key: &K) -> Result<(), u64>
where
    K: Hash + Eq + Clone,
{
    limiter.check_key(key).map_err(|negative| {
        negative
            .wait_time_from(DefaultClock::default().now())
            .as_secs()
            .max(1)
    })
}

/// Client address from `x-forwarded-for` (first hop) or the socket peer.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    client_ip_from_parts(request.headers(), request.extensions())
}

pub fn client_ip_from_parts(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let forwarded_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded_ip.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(&request) {
        Some(ip) => match check_key(&limiter, &ip) {
            Ok(()) => Ok(next.run(request).await),
            Err(retry_after) => {
                tracing::warn!(client_ip = %ip, "IP rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(retry_after),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_limiter_blocks_after_burst() {
        let limiter: KeyedRateLimiter<String> = create_keyed_rate_limiter(3, 60);
        let key = "tenant:alice".to_string();

        for _ in 0..3 {
            assert!(check_key(&limiter, &key).is_ok());
        }
        let retry = check_key(&limiter, &key).unwrap_err();
        assert!(retry >= 1);

        // Other keys are unaffected
        assert!(check_key(&limiter, &"tenant:bob".to_string()).is_ok());
    }

    #[test]
    fn zero_attempts_still_allows_one() {
        let limiter = create_ip_rate_limiter(0, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(check_key(&limiter, &ip).is_ok());
        assert!(check_key(&limiter, &ip).is_err());
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), Some("203.0.113.7".parse().unwrap()));
    }
}
