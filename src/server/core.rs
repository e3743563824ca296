//! Transport-independent MCP server core (C7): registries, lifecycle, dispatch.

use crate::error::{Error, Result};
use crate::protocol::{self, methods, ErrorObject, Frame, JsonRpcRequest, LogLevel, RequestId};
use crate::types::{Prompt, PromptMessage, Resource, ResourceContents, SessionState, Tool, ToolCall, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<ToolResult>;
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: &str) -> Result<ResourceContents>;
}

#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn get(&self, arguments: HashMap<String, Value>) -> Result<Vec<PromptMessage>>;
}

struct RegisteredTool {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

struct RegisteredResource {
    resource: Resource,
    handler: Arc<dyn ResourceHandler>,
}

struct RegisteredPrompt {
    prompt: Prompt,
    handler: Arc<dyn PromptHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Shutdown,
}

/// A single MCP server: owns the tool/resource/prompt registries and the
/// per-connection lifecycle state machine. Transport-agnostic (C6 wraps it).
pub struct ServerCore {
    pub name: String,
    pub version: String,
    tools: HashMap<String, RegisteredTool>,
    resources: HashMap<String, RegisteredResource>,
    prompts: HashMap<String, RegisteredPrompt>,
    state: RwLock<LifecycleState>,
    session: RwLock<SessionState>,
}

impl ServerCore {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: HashMap::new(),
            resources: HashMap::new(),
            prompts: HashMap::new(),
            state: RwLock::new(LifecycleState::Uninitialized),
            session: RwLock::new(SessionState::default()),
        }
    }

    pub fn register_tool(&mut self, tool: Tool, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(tool.name.clone(), RegisteredTool { tool, handler });
    }

    pub fn register_resource(&mut self, resource: Resource, handler: Arc<dyn ResourceHandler>) {
        self.resources.insert(resource.uri.clone(), RegisteredResource { resource, handler });
    }

    pub fn register_prompt(&mut self, prompt: Prompt, handler: Arc<dyn PromptHandler>) {
        self.prompts.insert(prompt.name.clone(), RegisteredPrompt { prompt, handler });
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.tool.clone()).collect()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.resources.values().map(|r| r.resource.clone()).collect()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.values().map(|p| p.prompt.clone()).collect()
    }

    pub fn resource_uris(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state.read().clone()
    }

    /// I4: a tool call always produces a `ToolResult`; handler errors never leak as exceptions.
    pub async fn call_tool(&self, call: ToolCall) -> ToolResult {
        match self.tools.get(&call.name) {
            None => ToolResult::error(format!("Tool not found: {}", call.name)),
            Some(entry) => match entry.handler.call(call.arguments).await {
                Ok(result) => result,
                Err(e) => ToolResult::error(e.to_string()),
            },
        }
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents> {
        match self.resources.get(uri) {
            Some(entry) => entry.handler.read(uri).await,
            None => Err(Error::ResourceNotFound(uri.to_string())),
        }
    }

    pub async fn get_prompt(&self, name: &str, arguments: HashMap<String, Value>) -> Result<Vec<PromptMessage>> {
        match self.prompts.get(name) {
            Some(entry) => entry.handler.get(arguments).await,
            None => Err(Error::MethodNotFound(format!("prompt not found: {name}"))),
        }
    }

    fn capabilities(&self) -> Value {
        let mut caps = json!({});
        if !self.tools.is_empty() {
            caps["tools"] = json!({ "listChanged": false });
        }
        if !self.resources.is_empty() {
            caps["resources"] = json!({ "subscribe": true, "listChanged": false });
        }
        if !self.prompts.is_empty() {
            caps["prompts"] = json!({ "listChanged": false });
        }
        caps
    }

    /// Dispatch one already-authorized request to the registry logic and produce the
    /// JSON `result` value (the hardened pipeline wraps this with validation/timeouts).
    pub async fn dispatch_request(&self, req: &JsonRpcRequest) -> Result<Value> {
        match req.method.as_str() {
            methods::INITIALIZE => {
                *self.state.write() = LifecycleState::Initializing;
                let params = req.params.clone().unwrap_or(json!({}));
                let mut session = self.session.write();
                session.client_name = params
                    .get("clientInfo")
                    .and_then(|c| c.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from);
                session.client_version = params
                    .get("clientInfo")
                    .and_then(|c| c.get("version"))
                    .and_then(Value::as_str)
                    .map(String::from);
                Ok(json!({
                    "protocolVersion": protocol::PROTOCOL_VERSION,
                    "capabilities": self.capabilities(),
                    "serverInfo": { "name": self.name, "version": self.version },
                }))
            }
            methods::SHUTDOWN => {
                *self.state.write() = LifecycleState::Shutdown;
                Ok(Value::Null)
            }
            methods::TOOLS_LIST => Ok(json!({ "tools": self.tools() })),
            methods::TOOLS_CALL => {
                let params = req
                    .params
                    .clone()
                    .ok_or_else(|| Error::InvalidParams("missing params".into()))?;
                let call: ToolCall = serde_json::from_value(params)
                    .map_err(|e| Error::InvalidParams(e.to_string()))?;
                let result = self.call_tool(call).await;
                Ok(serde_json::to_value(result)?)
            }
            methods::RESOURCES_LIST => Ok(json!({ "resources": self.resources() })),
            methods::RESOURCES_READ => {
                let uri = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidParams("missing \"uri\"".into()))?;
                let contents = self.read_resource(uri).await?;
                Ok(json!({ "contents": [contents] }))
            }
            methods::RESOURCES_SUBSCRIBE | methods::RESOURCES_UNSUBSCRIBE => Ok(json!({})),
            methods::PROMPTS_LIST => Ok(json!({ "prompts": self.prompts() })),
            methods::PROMPTS_GET => {
                let params = req.params.clone().unwrap_or(json!({}));
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidParams("missing \"name\"".into()))?
                    .to_string();
                let arguments: HashMap<String, Value> = params
                    .get("arguments")
                    .cloned()
                    .map(|v| serde_json::from_value(v).unwrap_or_default())
                    .unwrap_or_default();
                let messages = self.get_prompt(&name, arguments).await?;
                Ok(json!({ "messages": messages }))
            }
            methods::LOGGING_SET_LEVEL => {
                let level: LogLevel = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("level"))
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e: serde_json::Error| Error::InvalidParams(e.to_string()))?
                    .ok_or_else(|| Error::InvalidParams("missing \"level\"".into()))?;
                self.session.write().log_level = level;
                Ok(json!({}))
            }
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    /// Handle a single notification. I3 (pre-init gating) is enforced by the caller.
    pub fn handle_notification(&self, method: &str) {
        if method == methods::NOTIFICATIONS_INITIALIZED {
            *self.state.write() = LifecycleState::Ready;
            self.session.write().initialized = true;
        }
    }

    /// Full message handling entry point used directly by transports without the
    /// hardening pipeline (tests, trusted loopback use). Enforces I1/I2/I3.
    pub async fn handle_message(&self, raw: &str) -> Option<String> {
        let frame = match protocol::decode(raw) {
            Ok(f) => f,
            Err(e) => {
                let resp = protocol::JsonRpcResponse::failure(
                    RequestId::Number(0),
                    e.to_error_object(),
                );
                return protocol::encode(&Frame::Response(resp)).ok();
            }
        };

        match frame {
            Frame::Request(req) => {
                if !self.session.read().initialized
                    && req.method != methods::INITIALIZE
                    && req.method != methods::SHUTDOWN
                {
                    let err = ErrorObject {
                        code: crate::error::ErrorCode::INVALID_REQUEST.as_i32(),
                        message: "server not initialized".into(),
                        data: None,
                    };
                    let resp = protocol::JsonRpcResponse::failure(req.id, err);
                    return protocol::encode(&Frame::Response(resp)).ok();
                }
                let result = self.dispatch_request(&req).await;
                let resp = match result {
                    Ok(value) => protocol::JsonRpcResponse::success(req.id, value),
                    Err(e) => protocol::JsonRpcResponse::failure(req.id, e.to_error_object()),
                };
                protocol::encode(&Frame::Response(resp)).ok()
            }
            Frame::Notification(n) => {
                self.handle_notification(&n.method);
                None
            }
            Frame::Response(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: Value) -> Result<ToolResult> {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidParams("missing \"message\"".into()))?;
            Ok(ToolResult::text(format!("Echo: {message}")))
        }
    }

    fn echo_server() -> ServerCore {
        let mut server = ServerCore::new("test-server", "0.1.0");
        server.register_tool(
            Tool {
                name: "echo".into(),
                description: "Echo back a message".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }),
            },
            Arc::new(Echo),
        );
        server
    }

    #[tokio::test]
    async fn initialize_then_list_tools() {
        let server = echo_server();
        let init = server
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"c","version":"1"}}}"#)
            .await
            .unwrap();
        assert!(init.contains("\"serverInfo\""));

        server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized","params":{}}"#)
            .await;
        assert_eq!(server.lifecycle_state(), LifecycleState::Ready);

        let list = server
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#)
            .await
            .unwrap();
        assert!(list.contains("\"echo\""));
    }

    #[tokio::test]
    async fn pre_init_request_rejected() {
        let server = echo_server();
        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .await
            .unwrap();
        assert!(resp.contains("-32600"));
    }

    #[tokio::test]
    async fn tool_call_success_and_unknown_tool() {
        let server = echo_server();
        let result = server
            .call_tool(ToolCall { name: "echo".into(), arguments: json!({"message": "hi"}), call_id: None })
            .await;
        assert!(!result.is_error);

        let missing = server
            .call_tool(ToolCall { name: "nope".into(), arguments: json!({}), call_id: None })
            .await;
        assert!(missing.is_error);
    }
}
