//! Hardened request pipeline (C8): wraps `ServerCore` with rate limiting,
//! auth/authz, schema validation, timeouts, and metrics.
//!
//! Pipeline order: parse -> rate-limit check -> authenticate -> authorize
//! -> consume token -> dispatch-with-timeout -> record metrics.

use crate::protocol::{self, methods, ErrorObject, Frame, JsonRpcRequest, RequestId};
use crate::server::authz::{Authorizer, Credentials};
use crate::server::core::ServerCore;
use crate::server::metrics::{Metrics, RequestTimer, ToolTimer};
use crate::server::rate_limit::RateLimiter;
use crate::server::validator;
use crate::types::AuthContext;
use std::sync::Arc;
use std::time::Duration;

pub struct HardenedServer {
    pub core: ServerCore,
    pub rate_limiter: RateLimiter,
    pub authorizer: Authorizer,
    pub auth_provider: Arc<dyn crate::server::authz::AuthProvider>,
    pub metrics: Metrics,
    pub request_timeout: Duration,
}

impl HardenedServer {
    pub fn new(core: ServerCore, auth_provider: Arc<dyn crate::server::authz::AuthProvider>) -> Self {
        Self {
            core,
            rate_limiter: RateLimiter::new(Default::default()),
            authorizer: Authorizer::new(),
            auth_provider,
            metrics: Metrics::new(),
            request_timeout: Duration::from_secs(30),
        }
    }

    fn tool_name(req: &JsonRpcRequest) -> Option<&str> {
        if req.method != methods::TOOLS_CALL {
            return None;
        }
        req.params.as_ref()?.get("name")?.as_str()
    }

    fn error_response(id: RequestId, code: crate::error::ErrorCode, message: impl Into<String>, data: Option<serde_json::Value>) -> protocol::JsonRpcResponse {
        protocol::JsonRpcResponse::failure(id, ErrorObject { code: code.as_i32(), message: message.into(), data })
    }

    /// Run one raw inbound message through the full hardening pipeline.
    pub async fn handle_message(&self, raw: &str, client_id: &str, credentials: &Credentials) -> Option<String> {
        let frame = match protocol::decode(raw) {
            Ok(f) => f,
            Err(e) => {
                let resp = protocol::JsonRpcResponse::failure(RequestId::Number(0), e.to_error_object());
                return protocol::encode(&Frame::Response(resp)).ok();
            }
        };

        let req = match frame {
            Frame::Request(r) => r,
            Frame::Notification(n) => {
                self.core.handle_notification(&n.method);
                return None;
            }
            Frame::Response(_) => return None,
        };

        let mut timer = RequestTimer::start(&self.metrics, req.method.clone());
        let tool = Self::tool_name(&req).map(String::from);

        let decision = self.rate_limiter.check_and_consume(client_id, tool.as_deref());
        if !decision.allowed {
            timer.mark_failed();
            let resp = Self::error_response(
                req.id,
                crate::error::ErrorCode::RATE_LIMITED,
                "rate limit exceeded",
                Some(serde_json::json!({ "retryAfter": decision.retry_after.unwrap_or(1.0) })),
            );
            return protocol::encode(&Frame::Response(resp)).ok();
        }

        let ctx: AuthContext = match self.auth_provider.authenticate(credentials) {
            Some(ctx) => ctx,
            None => {
                timer.mark_failed();
                let resp = Self::error_response(req.id, crate::error::ErrorCode::PERMISSION_DENIED, "authentication failed", None);
                return protocol::encode(&Frame::Response(resp)).ok();
            }
        };

        if !self.authorizer.authorize(&ctx, &req.method, tool.as_deref()) {
            timer.mark_failed();
            let resp = Self::error_response(req.id, crate::error::ErrorCode::PERMISSION_DENIED, "not authorized", None);
            return protocol::encode(&Frame::Response(resp)).ok();
        }

        if req.method == methods::TOOLS_CALL {
            if let Some(validation_error) = self.validate_tool_call(&req) {
                return Some(validation_error);
            }
        }

        if !self.core_session_ready(&req) {
            timer.mark_failed();
            let resp = Self::error_response(req.id, crate::error::ErrorCode::INVALID_REQUEST, "server not initialized", None);
            return protocol::encode(&Frame::Response(resp)).ok();
        }

        let mut tool_timer = tool.as_deref().map(|t| ToolTimer::start(&self.metrics, t));

        let dispatch = tokio::time::timeout(self.request_timeout, self.core.dispatch_request(&req)).await;
        let resp = match dispatch {
            Ok(Ok(value)) => {
                if value.get("isError").and_then(serde_json::Value::as_bool).unwrap_or(false) {
                    if let Some(t) = tool_timer.as_mut() {
                        t.mark_failed();
                    }
                }
                protocol::JsonRpcResponse::success(req.id, value)
            }
            Ok(Err(e)) => {
                timer.mark_failed();
                if let Some(t) = tool_timer.as_mut() {
                    t.mark_failed();
                }
                protocol::JsonRpcResponse::failure(req.id, e.to_error_object())
            }
            Err(_) => {
                timer.mark_failed();
                if let Some(t) = tool_timer.as_mut() {
                    t.mark_failed();
                }
                Self::error_response(req.id, crate::error::ErrorCode::REQUEST_TIMEOUT, "request timed out", None)
            }
        };
        protocol::encode(&Frame::Response(resp)).ok()
    }

    fn core_session_ready(&self, req: &JsonRpcRequest) -> bool {
        matches!(self.core.lifecycle_state(), crate::server::core::LifecycleState::Ready)
            || req.method == methods::INITIALIZE
            || req.method == methods::SHUTDOWN
    }

    /// P5: schema validation failure produces `isError=true` without invoking the handler.
    fn validate_tool_call(&self, req: &JsonRpcRequest) -> Option<String> {
        let params = req.params.clone()?;
        let name = params.get("name")?.as_str()?;
        let arguments = params.get("arguments").cloned().unwrap_or(serde_json::json!({}));
        let tool = self.core.tools().into_iter().find(|t| t.name == name)?;
        let result = validator::validate(&tool.input_schema, &arguments);
        if result.valid {
            return None;
        }
        let tool_result = crate::types::ToolResult::error(result.errors.join("; "));
        let value = serde_json::to_value(tool_result).ok()?;
        let resp = protocol::JsonRpcResponse::success(req.id.clone(), value);
        protocol::encode(&Frame::Response(resp)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::authz::NoAuth;
    use crate::server::core::ToolHandler;
    use crate::types::{Tool, ToolResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Echo;
    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: serde_json::Value) -> crate::error::Result<ToolResult> {
            Ok(ToolResult::text(arguments.get("message").and_then(serde_json::Value::as_str).unwrap_or("")))
        }
    }

    fn hardened_echo() -> HardenedServer {
        let mut core = ServerCore::new("test", "0.1.0");
        core.register_tool(
            Tool {
                name: "echo".into(),
                description: "echo".into(),
                input_schema: json!({ "type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"] }),
            },
            Arc::new(Echo),
        );
        let server = HardenedServer::new(core, Arc::new(NoAuth { default_role: "standard".into() }));
        server.authorizer.register_role(crate::types::Role::standard());
        server
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_before_handler() {
        let server = hardened_echo();
        server.core.handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        server.core.handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;

        let resp = server
            .handle_message(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#,
                "client-1",
                &Credentials::bearer("x"),
            )
            .await
            .unwrap();
        assert!(resp.contains("\"isError\":true"));
    }

    #[tokio::test]
    async fn rate_limit_exceeded_returns_dash_32029() {
        let server = hardened_echo();
        server.rate_limiter.set_tool_limit(
            "echo",
            crate::server::rate_limit::RateLimitConfig {
                requests_per_second: 0.0,
                burst_capacity: 0.0,
                per_minute_limit: None,
                cooldown: Duration::from_secs(60),
            },
        );
        server.core.handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        server.core.handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        let resp = server
            .handle_message(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
                "client-1",
                &Credentials::bearer("x"),
            )
            .await
            .unwrap();
        assert!(resp.contains("-32029"));
    }

    #[tokio::test]
    async fn successful_tool_call_records_tool_metrics() {
        let server = hardened_echo();
        server.core.handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        server.core.handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;

        assert_eq!(server.metrics.counter_value("mcp_tool_calls_total", &[("tool", "echo")]), 0);

        server
            .handle_message(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
                "client-1",
                &Credentials::bearer("x"),
            )
            .await
            .unwrap();

        assert_eq!(server.metrics.counter_value("mcp_tool_calls_total", &[("tool", "echo")]), 1);
    }
}
