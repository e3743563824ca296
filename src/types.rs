//! Domain model shared by server, client, and agent layers (§3).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A registered tool's advertised shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A registered resource's advertised shape (handler lives alongside it in the registry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: ToolContent,
}

/// One piece of tool or prompt content. Tagged the way the MCP wire format expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    #[serde(rename_all = "camelCase")]
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    Image { data: String, mime_type: String },
    #[serde(rename_all = "camelCase")]
    Resource { resource: ResourceContents },
}

impl ToolContent {
    pub fn text(s: impl Into<String>) -> Self {
        ToolContent::Text { text: s.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: Vec<ToolContent>) -> Self {
        Self { call_id: None, content, is_error: false }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { call_id: None, content: vec![ToolContent::text(message)], is_error: true }
    }

    pub fn text(message: impl Into<String>) -> Self {
        Self::ok(vec![ToolContent::text(message)])
    }
}

/// Per-connection session state (lifecycle tracked separately in `server::core`).
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub initialized: bool,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    pub log_level: crate::protocol::LogLevel,
}

/// The fixed permission vocabulary (§3, supplemented beyond the distilled spec's
/// `tools:list`/`tools:call` pair with the richer admin/write set from the source system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ToolsList,
    ToolsCall,
    ToolsCallDangerous,
    ResourcesList,
    ResourcesRead,
    ResourcesWrite,
    PromptsList,
    PromptsGet,
    AdminConfig,
    AdminLogs,
}

#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub permissions: HashSet<Permission>,
    pub tool_allowlist: Option<HashSet<String>>,
    pub tool_denylist: HashSet<String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: HashSet::new(),
            tool_allowlist: None,
            tool_denylist: HashSet::new(),
        }
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(perms);
        self
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        if self.tool_denylist.contains(tool) {
            return false;
        }
        match &self.tool_allowlist {
            Some(allow) => allow.contains(tool),
            None => true,
        }
    }

    /// A role with every permission and no tool restrictions.
    pub fn admin() -> Self {
        Self::new("admin").with_permissions([
            Permission::ToolsList,
            Permission::ToolsCall,
            Permission::ToolsCallDangerous,
            Permission::ResourcesList,
            Permission::ResourcesRead,
            Permission::ResourcesWrite,
            Permission::PromptsList,
            Permission::PromptsGet,
            Permission::AdminConfig,
            Permission::AdminLogs,
        ])
    }

    /// Read-only role: list/call/read but no writes or admin surface.
    pub fn standard() -> Self {
        Self::new("standard").with_permissions([
            Permission::ToolsList,
            Permission::ToolsCall,
            Permission::ResourcesList,
            Permission::ResourcesRead,
            Permission::PromptsList,
            Permission::PromptsGet,
        ])
    }
}

/// Request-scoped identity derived by the auth layer; never persisted (§3).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub client_id: String,
    pub authenticated: bool,
    pub role: Option<String>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl AuthContext {
    pub fn anonymous(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authenticated: false,
            role: None,
            user_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn authenticated(client_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authenticated: true,
            role: Some(role.into()),
            user_id: None,
            metadata: HashMap::new(),
        }
    }
}

/// Ordered risk classification for a tool invocation (C13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_allowlist_overrides_default_allow() {
        let role = Role::new("limited").with_permissions([Permission::ToolsCall]);
        assert!(role.allows_tool("anything"));

        let mut restricted = role.clone();
        restricted.tool_allowlist = Some(["echo".to_string()].into_iter().collect());
        assert!(restricted.allows_tool("echo"));
        assert!(!restricted.allows_tool("delete"));
    }

    #[test]
    fn denylist_wins_over_allowlist() {
        let mut role = Role::new("r");
        role.tool_allowlist = Some(["echo".to_string()].into_iter().collect());
        role.tool_denylist.insert("echo".to_string());
        assert!(!role.allows_tool("echo"));
    }

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Safe < RiskLevel::Critical);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn tool_result_text_is_not_error() {
        let r = ToolResult::text("hi");
        assert!(!r.is_error);
        assert_eq!(r.content.len(), 1);
    }
}
