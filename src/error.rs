//! Error types shared across the crate.
//!
//! Mirrors the JSON-RPC / MCP error taxonomy: [`Error`] is the internal,
//! `thiserror`-derived representation used throughout the library; [`ErrorCode`]
//! is the wire-level integer, exposed as associated consts rather than a bare
//! enum so call sites read `ErrorCode::TOOL_NOT_FOUND` the way they'd read a
//! constant from the spec.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON-RPC / MCP error code.
///
/// Reserved JSON-RPC codes occupy `-32700..=-32600`; MCP-specific codes are
/// namespaced under `-32000..=-32099`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const PARSE_ERROR: ErrorCode = ErrorCode(-32700);
    pub const INVALID_REQUEST: ErrorCode = ErrorCode(-32600);
    pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode(-32601);
    pub const INVALID_PARAMS: ErrorCode = ErrorCode(-32602);
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(-32603);

    pub const TOOL_NOT_FOUND: ErrorCode = ErrorCode(-32001);
    pub const RESOURCE_NOT_FOUND: ErrorCode = ErrorCode(-32002);
    pub const PERMISSION_DENIED: ErrorCode = ErrorCode(-32003);
    pub const REQUEST_TIMEOUT: ErrorCode = ErrorCode(-32004);
    pub const RATE_LIMITED: ErrorCode = ErrorCode(-32029);

    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The crate's internal error type.
///
/// Every variant has a fixed [`ErrorCode`] via [`Error::code`], which is the
/// single place the wire code is derived from — call sites never hand-pick a
/// code themselves.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited, retry after {retry_after:.3}s")]
    RateLimited { retry_after: f64 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// The wire-level [`ErrorCode`] this variant maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Parse(_) | Error::Json(_) => ErrorCode::PARSE_ERROR,
            Error::InvalidRequest(_) | Error::Protocol(_) => ErrorCode::INVALID_REQUEST,
            Error::MethodNotFound(_) => ErrorCode::METHOD_NOT_FOUND,
            Error::InvalidParams(_) => ErrorCode::INVALID_PARAMS,
            Error::ToolNotFound(_) => ErrorCode::TOOL_NOT_FOUND,
            Error::ResourceNotFound(_) => ErrorCode::RESOURCE_NOT_FOUND,
            Error::PermissionDenied(_) | Error::Auth(_) => ErrorCode::PERMISSION_DENIED,
            Error::Timeout(_) => ErrorCode::REQUEST_TIMEOUT,
            Error::RateLimited { .. } => ErrorCode::RATE_LIMITED,
            Error::Internal(_) | Error::Io(_) => ErrorCode::INTERNAL_ERROR,
        }
    }

    /// Convert to the wire `ErrorObject`, carrying `retryAfter`/etc in `data` where relevant.
    pub fn to_error_object(&self) -> crate::protocol::ErrorObject {
        let data = match self {
            Error::RateLimited { retry_after } => {
                Some(serde_json::json!({ "retryAfter": retry_after }))
            }
            _ => None,
        };
        crate::protocol::ErrorObject {
            code: self.code().as_i32(),
            message: self.to_string(),
            data,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(Error::ToolNotFound("x".into()).code(), ErrorCode::TOOL_NOT_FOUND);
        assert_eq!(
            Error::RateLimited { retry_after: 1.5 }.code(),
            ErrorCode::RATE_LIMITED
        );
    }

    #[test]
    fn rate_limited_carries_retry_after_in_data() {
        let err = Error::RateLimited { retry_after: 2.0 };
        let obj = err.to_error_object();
        assert_eq!(obj.code, -32029);
        assert_eq!(obj.data.unwrap()["retryAfter"], 2.0);
    }
}
