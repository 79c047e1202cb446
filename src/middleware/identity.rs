use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

use super::request_id::RequestId;
use crate::{models::Viewer, services::interactions::ClientContext};

/// Header carrying the authenticated user's id, set by the upstream auth proxy
pub const USER_ID_HEADER: &str = "x-user-id";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REAL_IP_HEADER: &str = "x-real-ip";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address: first `x-forwarded-for` hop, then `x-real-ip`, then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|list| list.split(',').map(str::trim).find(|hop| !hop.is_empty()))
        .or_else(|| header_str(headers, REAL_IP_HEADER))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(match header_str(&parts.headers, USER_ID_HEADER) {
            Some(user_id) => Viewer::user(user_id),
            None => Viewer::anonymous(),
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_default();

        Ok(ClientContext {
            ip: client_ip(&parts.headers, peer),
            user_agent: header_str(&parts.headers, "user-agent").map(str::to_string),
            request_id: request_id.0,
        })
    }
}
