//! JSON-RPC 2.0 framing and MCP method/level constants (C1).
//!
//! `Frame` is the tagged union of request/notification/response; `decode`
//! classifies raw JSON into one of those per the presence of `method`/`id`
//! and `result`/`error`, matching the protocol rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC request/notification id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: Some(result), error: None }
    }

    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: None, error: Some(error) }
    }
}

/// The decoded shape of one wire message (I1/I2).
#[derive(Debug, Clone)]
pub enum Frame {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

/// Decode a raw JSON text into a classified [`Frame`].
///
/// Rejects anything that isn't a JSON object, a missing/wrong `jsonrpc`
/// field, a non-string `method`, or a `params` that isn't an object/array
/// when present.
pub fn decode(bytes: &str) -> Result<Frame, crate::error::Error> {
    let value: Value = serde_json::from_str(bytes)
        .map_err(|e| crate::error::Error::Parse(e.to_string()))?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<Frame, crate::error::Error> {
    let obj = value
        .as_object()
        .ok_or_else(|| crate::error::Error::InvalidRequest("frame is not a JSON object".into()))?;

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => {}
        _ => {
            return Err(crate::error::Error::InvalidRequest(
                "missing or invalid \"jsonrpc\" field".into(),
            ))
        }
    }

    let has_method = obj.contains_key("method");
    let has_id = obj.contains_key("id") && !obj.get("id").unwrap().is_null();
    let has_result_or_error = obj.contains_key("result") || obj.contains_key("error");

    if has_method {
        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| crate::error::Error::InvalidRequest("\"method\" must be a string".into()))?
            .to_string();
        if let Some(params) = obj.get("params") {
            if !params.is_object() && !params.is_array() && !params.is_null() {
                return Err(crate::error::Error::InvalidRequest(
                    "\"params\" must be an object or array".into(),
                ));
            }
        }
        let params = obj.get("params").cloned();

        if has_id {
            let id: RequestId = serde_json::from_value(obj.get("id").unwrap().clone())
                .map_err(|e| crate::error::Error::InvalidRequest(format!("invalid id: {e}")))?;
            Ok(Frame::Request(JsonRpcRequest { jsonrpc: "2.0".into(), id, method, params }))
        } else {
            Ok(Frame::Notification(JsonRpcNotification { jsonrpc: "2.0".into(), method, params }))
        }
    } else if has_result_or_error {
        if obj.contains_key("result") && obj.contains_key("error") {
            return Err(crate::error::Error::InvalidRequest(
                "response cannot carry both \"result\" and \"error\"".into(),
            ));
        }
        let id: RequestId = serde_json::from_value(
            obj.get("id").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| crate::error::Error::InvalidRequest(format!("invalid id: {e}")))?;
        let result = obj.get("result").cloned();
        let error = obj
            .get("error")
            .map(|e| serde_json::from_value(e.clone()))
            .transpose()
            .map_err(|e| crate::error::Error::InvalidRequest(format!("invalid error object: {e}")))?;
        Ok(Frame::Response(JsonRpcResponse { jsonrpc: "2.0".into(), id, result, error }))
    } else {
        Err(crate::error::Error::InvalidRequest(
            "frame has neither \"method\" nor \"result\"/\"error\"".into(),
        ))
    }
}

/// Encode a [`Frame`] back to wire JSON text.
pub fn encode(frame: &Frame) -> Result<String, crate::error::Error> {
    let value = match frame {
        Frame::Request(r) => serde_json::to_value(r)?,
        Frame::Notification(n) => serde_json::to_value(n)?,
        Frame::Response(r) => serde_json::to_value(r)?,
    };
    Ok(serde_json::to_string(&value)?)
}

/// RFC 5424 severities used by `logging/setLevel` and `notifications/message`, ordered
/// from least to most severe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

/// The fixed MCP method name set (§6).
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
    pub const NOTIFICATIONS_INITIALIZED: &str = "notifications/initialized";
    pub const NOTIFICATIONS_CANCELLED: &str = "notifications/cancelled";
    pub const NOTIFICATIONS_PROGRESS: &str = "notifications/progress";
    pub const NOTIFICATIONS_RESOURCES_UPDATED: &str = "notifications/resources/updated";
    pub const NOTIFICATIONS_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const NOTIFICATIONS_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const NOTIFICATIONS_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    pub const NOTIFICATIONS_MESSAGE: &str = "notifications/message";
}
