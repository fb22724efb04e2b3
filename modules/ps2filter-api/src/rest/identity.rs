use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

use ps2filter_common::ClientIdentity;

use crate::AppState;

/// Proxy headers checked in order before the peer address, when trusted.
const CLIENT_IP_HEADERS: &[&str] = &[
    "x-client-ip",
    "x-forwarded-for",
    "cf-connecting-ip",
    "fastly-client-ip",
    "true-client-ip",
    "x-real-ip",
];

/// Caller identity for rate limiting. `None` when no address could be found.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub Option<ClientIdentity>);

impl FromRequestParts<Arc<AppState>> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(ClientAddr(derive_client_identity(
            &parts.headers,
            peer,
            state.trust_proxy_headers,
        )))
    }
}

/// The connecting peer's address. Forwarding headers are consulted first
/// only when `trust_proxy_headers` is set, since any caller can send them.
pub fn derive_client_identity(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> Option<ClientIdentity> {
    let forwarded = if trust_proxy_headers {
        CLIENT_IP_HEADERS
            .iter()
            .filter_map(|name| headers.get(*name)?.to_str().ok())
            .find_map(|value| value.split(',').find_map(parse_ip))
    } else {
        None
    };

    forwarded
        .or(peer)
        .map(|ip| ClientIdentity::new(ip.to_string()))
}

/// Accepts a bare address or `address:port`.
fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
