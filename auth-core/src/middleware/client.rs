use axum::{extract::FromRequestParts, http::request::Parts};
use service_core::middleware::client_ip_from_parts;
use std::{convert::Infallible, net::IpAddr};

/// Best-effort caller address, used to key login throttling.
pub struct ClientIp(pub Option<IpAddr>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip_from_parts(&parts.headers, &parts.extensions)))
    }
}
