//! Multi-server composition with prefix-based routing (C9).

use crate::server::core::ServerCore;
use crate::types::{ResourceContents, Tool, ToolCall, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Aggregates N `ServerCore`s behind one surface. Each tool is reachable as
/// `prefix.tool` (always unambiguous) and, unless shadowed, as the bare `tool`
/// name (last server registered wins the bare-name slot — see DESIGN.md).
pub struct Registry {
    servers: HashMap<String, Arc<ServerCore>>,
    tool_routes: HashMap<String, String>,
    resource_routes: Vec<(String, String)>,
    prompt_routes: HashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
            tool_routes: HashMap::new(),
            resource_routes: Vec::new(),
            prompt_routes: HashMap::new(),
        }
    }

    pub fn register_server(&mut self, prefix: impl Into<String>, server: Arc<ServerCore>) {
        let prefix = prefix.into();
        for tool in server.tools() {
            self.tool_routes.insert(tool.name.clone(), prefix.clone());
        }
        for uri in server.resource_uris() {
            self.resource_routes.push((uri.to_string(), prefix.clone()));
        }
        for prompt in server.prompts() {
            self.prompt_routes.insert(prompt.name.clone(), prefix.clone());
        }
        self.servers.insert(prefix, server);
    }

    pub fn tools(&self) -> Vec<Tool> {
        let mut seen = std::collections::HashSet::new();
        let mut all = Vec::new();
        for (prefix, server) in &self.servers {
            for mut tool in server.tools() {
                let bare = tool.name.clone();
                let prefixed = format!("{prefix}.{bare}");
                tool.name = prefixed;
                all.push(tool);
                seen.insert(bare);
            }
        }
        all
    }

    pub fn stats(&self) -> (usize, usize, usize, usize) {
        let tools: usize = self.servers.values().map(|s| s.tools().len()).sum();
        let resources: usize = self.servers.values().map(|s| s.resources().len()).sum();
        let prompts: usize = self.servers.values().map(|s| s.prompts().len()).sum();
        (self.servers.len(), tools, resources, prompts)
    }

    fn split_prefix(name: &str) -> Option<(&str, &str)> {
        name.split_once('.')
    }

    pub async fn call_tool(&self, call: ToolCall) -> ToolResult {
        if let Some((prefix, bare)) = Self::split_prefix(&call.name) {
            if let Some(server) = self.servers.get(prefix) {
                let stripped = ToolCall { name: bare.to_string(), ..call };
                return server.call_tool(stripped).await;
            }
        }
        match self.tool_routes.get(&call.name).and_then(|p| self.servers.get(p)) {
            Some(server) => server.call_tool(call).await,
            None => ToolResult::error(format!("Tool not found: {}", call.name)),
        }
    }

    /// Longest-prefix match among registered resource URIs (a deliberate
    /// tightening over a looser first-match policy).
    pub async fn read_resource(&self, uri: &str) -> crate::error::Result<ResourceContents> {
        let best = self
            .resource_routes
            .iter()
            .filter(|(registered, _)| uri.starts_with(registered.as_str()))
            .max_by_key(|(registered, _)| registered.len());

        match best {
            Some((_, prefix)) => self.servers[prefix].read_resource(uri).await,
            None => Err(crate::error::Error::ResourceNotFound(uri.to_string())),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::core::ToolHandler;
    use async_trait::async_trait;
    use serde_json::json;

    struct Const(&'static str);
    #[async_trait]
    impl ToolHandler for Const {
        async fn call(&self, _arguments: serde_json::Value) -> crate::error::Result<ToolResult> {
            Ok(ToolResult::text(self.0))
        }
    }

    fn server_with_tool(name: &str, reply: &'static str) -> Arc<ServerCore> {
        let mut s = ServerCore::new("s", "0.1.0");
        s.register_tool(
            Tool { name: name.into(), description: "d".into(), input_schema: json!({}) },
            Arc::new(Const(reply)),
        );
        Arc::new(s)
    }

    #[tokio::test]
    async fn prefixed_and_bare_routing_both_resolve() {
        let mut registry = Registry::new();
        registry.register_server("fs", server_with_tool("read", "fs-read"));

        let prefixed = registry.call_tool(ToolCall { name: "fs.read".into(), arguments: json!({}), call_id: None }).await;
        assert_eq!(prefixed.content[0].clone(), crate::types::ToolContent::text("fs-read"));

        let bare = registry.call_tool(ToolCall { name: "read".into(), arguments: json!({}), call_id: None }).await;
        assert_eq!(bare.content[0].clone(), crate::types::ToolContent::text("fs-read"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_an_error_panic() {
        let registry = Registry::new();
        let result = registry.call_tool(ToolCall { name: "nope".into(), arguments: json!({}), call_id: None }).await;
        assert!(result.is_error);
    }

    #[test]
    fn longest_prefix_wins_resource_routing() {
        let mut registry = Registry::new();
        let mut short = ServerCore::new("short", "0.1.0");
        short.register_resource(
            crate::types::Resource { uri: "file://".into(), name: "root".into(), description: None, mime_type: None },
            Arc::new(NullResource),
        );
        let mut long = ServerCore::new("long", "0.1.0");
        long.register_resource(
            crate::types::Resource { uri: "file:///var/".into(), name: "var".into(), description: None, mime_type: None },
            Arc::new(NullResource),
        );
        registry.register_server("short", Arc::new(short));
        registry.register_server("long", Arc::new(long));

        let best = registry
            .resource_routes
            .iter()
            .filter(|(r, _)| "file:///var/log".starts_with(r.as_str()))
            .max_by_key(|(r, _)| r.len())
            .unwrap();
        assert_eq!(best.1, "long");
    }

    struct NullResource;
    #[async_trait]
    impl crate::server::core::ResourceHandler for NullResource {
        async fn read(&self, uri: &str) -> crate::error::Result<ResourceContents> {
            Ok(ResourceContents { uri: uri.into(), mime_type: None, text: Some(String::new()), blob: None })
        }
    }
}
