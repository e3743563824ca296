//! Multi-transport message I/O (C6): stdio, WebSocket, HTTP+SSE — all driving
//! the same [`crate::server::hardened::HardenedServer`].

pub mod stdio;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "http")]
pub mod http;

use crate::server::authz::Credentials;

/// Extracts bearer-token credentials from an `Authorization: Bearer <token>` header value.
pub fn credentials_from_bearer_header(header: Option<&str>) -> Credentials {
    let token = header.and_then(|h| h.strip_prefix("Bearer ")).map(str::to_string);
    Credentials { token, client_id: None, timestamp: None, signature: None, body: None }
}
