//! Transport-agnostic client (C10): one typed API regardless of whether the
//! underlying transport is request/response-correlated (stdio/WebSocket) or
//! stateless (HTTP).

use crate::error::{Error, Result};
use crate::protocol::{self, methods, Frame, JsonRpcRequest, RequestId};
use crate::types::{Prompt, PromptMessage, Resource, ResourceContents, Tool, ToolCall, ToolResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Implemented once per concrete transport; the client only ever talks to this.
#[async_trait::async_trait]
pub trait ClientTransport: Send + Sync {
    /// Send a raw frame. For request/response transports this does not wait for
    /// the reply — replies arrive through `set_inbound_handler`'s callback and are
    /// correlated by the caller. For stateless transports (HTTP), implementations
    /// may instead perform the whole round trip here and feed the response back
    /// through the same handler synchronously.
    async fn send(&self, raw: String) -> Result<()>;
}

struct Pending {
    sender: oneshot::Sender<protocol::JsonRpcResponse>,
}

/// Correlates outstanding requests to responses by id, independent of transport.
#[derive(Default)]
pub struct PendingRequests {
    table: Mutex<HashMap<RequestId, Pending>>,
}

impl PendingRequests {
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<protocol::JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.table.lock().insert(id, Pending { sender: tx });
        rx
    }

    /// Feed an inbound frame; completes the matching pending request if any.
    pub fn on_inbound(&self, frame: Frame) {
        if let Frame::Response(resp) = frame {
            if let Some(pending) = self.table.lock().remove(&resp.id) {
                let _ = pending.sender.send(resp);
            }
        }
    }

    pub fn cancel_all(&self) {
        self.table.lock().clear();
    }
}

/// Transport-agnostic MCP client. `transport` does the actual I/O; `pending`
/// correlates ids to in-flight futures for request/response transports.
pub struct Client {
    transport: Arc<dyn ClientTransport>,
    pending: Arc<PendingRequests>,
    next_id: AtomicI64,
    pub server_name: Mutex<Option<String>>,
}

impl Client {
    pub fn new(transport: Arc<dyn ClientTransport>, pending: Arc<PendingRequests>) -> Self {
        Self { transport, pending, next_id: AtomicI64::new(1), server_name: Mutex::new(None) }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_request_id();
        let req = JsonRpcRequest { jsonrpc: "2.0".into(), id: id.clone(), method: method.to_string(), params: Some(params) };
        let raw = protocol::encode(&Frame::Request(req))?;
        let rx = self.pending.register(id);
        self.transport.send(raw).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => match resp.error {
                Some(e) => Err(Error::Internal(e.message)),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(Error::Protocol("response channel closed".into())),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let frame = Frame::Notification(protocol::JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.to_string(),
            params: Some(params),
        });
        self.transport.send(protocol::encode(&frame)?).await
    }

    pub async fn initialize(&self, client_name: &str, client_version: &str) -> Result<Value> {
        let result = self
            .request(
                methods::INITIALIZE,
                json!({
                    "protocolVersion": protocol::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": client_name, "version": client_version }
                }),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if let Some(name) = result.get("serverInfo").and_then(|s| s.get("name")).and_then(Value::as_str) {
            *self.server_name.lock() = Some(name.to_string());
        }
        self.notify(methods::NOTIFICATIONS_INITIALIZED, json!({})).await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result = self.request(methods::TOOLS_LIST, json!({}), DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(serde_json::from_value(result.get("tools").cloned().unwrap_or(json!([])))?)
    }

    pub async fn call_tool(&self, call: ToolCall) -> Result<ToolResult> {
        let result = self.request(methods::TOOLS_CALL, serde_json::to_value(&call)?, DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let result = self.request(methods::RESOURCES_LIST, json!({}), DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(serde_json::from_value(result.get("resources").cloned().unwrap_or(json!([])))?)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents> {
        let result = self
            .request(methods::RESOURCES_READ, json!({ "uri": uri }), DEFAULT_REQUEST_TIMEOUT)
            .await?;
        let contents = result
            .get("contents")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound(uri.to_string()))?;
        Ok(serde_json::from_value(contents)?)
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let result = self.request(methods::PROMPTS_LIST, json!({}), DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(serde_json::from_value(result.get("prompts").cloned().unwrap_or(json!([])))?)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Vec<PromptMessage>> {
        let result = self
            .request(methods::PROMPTS_GET, json!({ "name": name, "arguments": arguments }), DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(serde_json::from_value(result.get("messages").cloned().unwrap_or(json!([])))?)
    }

    pub async fn disconnect(&self) -> Result<()> {
        let _ = self.notify(methods::SHUTDOWN, json!({})).await;
        self.pending.cancel_all();
        Ok(())
    }
}

/// An in-process transport that talks directly to a `ServerCore`/`HardenedServer`
/// without any network hop — used for tests and same-process composition.
pub struct LoopbackTransport {
    pending: Arc<PendingRequests>,
    server: Arc<crate::server::core::ServerCore>,
}

impl LoopbackTransport {
    pub fn new(server: Arc<crate::server::core::ServerCore>, pending: Arc<PendingRequests>) -> Self {
        Self { pending, server }
    }
}

#[async_trait::async_trait]
impl ClientTransport for LoopbackTransport {
    async fn send(&self, raw: String) -> Result<()> {
        if let Some(response_raw) = self.server.handle_message(&raw).await {
            if let Ok(frame) = protocol::decode(&response_raw) {
                self.pending.on_inbound(frame);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::core::{ServerCore, ToolHandler};
    use crate::types::ToolResult as TR;
    use async_trait::async_trait;

    struct Echo;
    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: Value) -> Result<TR> {
            Ok(TR::text(arguments.get("message").and_then(Value::as_str).unwrap_or("")))
        }
    }

    fn echo_server() -> Arc<ServerCore> {
        let mut s = ServerCore::new("echo-server", "0.1.0");
        s.register_tool(
            Tool { name: "echo".into(), description: "d".into(), input_schema: json!({}) },
            Arc::new(Echo),
        );
        Arc::new(s)
    }

    #[tokio::test]
    async fn initialize_then_call_tool_over_loopback() {
        let server = echo_server();
        let pending = Arc::new(PendingRequests::default());
        let transport = Arc::new(LoopbackTransport::new(server, pending.clone()));
        let client = Client::new(transport, pending);

        let init = client.initialize("test-client", "0.1.0").await.unwrap();
        assert_eq!(init["serverInfo"]["name"], "echo-server");

        let result = client
            .call_tool(ToolCall { name: "echo".into(), arguments: json!({"message": "hi"}), call_id: None })
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn request_times_out_when_no_response_arrives() {
        struct BlackHole;
        #[async_trait::async_trait]
        impl ClientTransport for BlackHole {
            async fn send(&self, _raw: String) -> Result<()> {
                Ok(())
            }
        }
        let pending = Arc::new(PendingRequests::default());
        let client = Client::new(Arc::new(BlackHole), pending);
        let result = client.request("tools/list", json!({}), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
