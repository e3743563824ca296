//! Pluggable authentication and role-based authorization (C4).
//!
//! Bearer-token and HMAC comparisons run in constant time with respect to the
//! secret (I9) via the `subtle` crate, closing a timing side channel a plain
//! `==` comparison would leave open.

use crate::protocol::methods;
use crate::types::{AuthContext, Permission, Role};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub timestamp: Option<i64>,
    pub signature: Option<String>,
    pub body: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()), client_id: None, timestamp: None, signature: None, body: None }
    }
}

pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Option<AuthContext>;
}

/// No authentication: every caller is treated as authenticated with a fixed role.
pub struct NoAuth {
    pub default_role: String,
}

impl AuthProvider for NoAuth {
    fn authenticate(&self, _credentials: &Credentials) -> Option<AuthContext> {
        Some(AuthContext::authenticated("anonymous", self.default_role.clone()))
    }
}

fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256(token) -> role lookup, compared in constant time (I9).
pub struct BearerAuth {
    tokens: HashMap<String, String>,
}

impl BearerAuth {
    pub fn new(token_roles: impl IntoIterator<Item = (String, String)>) -> Self {
        let tokens = token_roles.into_iter().map(|(token, role)| (sha256_hex(&token), role)).collect();
        Self { tokens }
    }
}

impl AuthProvider for BearerAuth {
    fn authenticate(&self, credentials: &Credentials) -> Option<AuthContext> {
        let token = credentials.token.as_ref()?;
        let candidate_hash = sha256_hex(token);
        for (stored_hash, role) in &self.tokens {
            if constant_time_eq_str(stored_hash, &candidate_hash) {
                return Some(AuthContext::authenticated(token.clone(), role.clone()));
            }
        }
        None
    }
}

/// HMAC-SHA256(secret, clientId:timestamp:body) with a +/-300s freshness window.
pub struct HmacAuth {
    secret: Vec<u8>,
    role: String,
    freshness: i64,
}

impl HmacAuth {
    pub fn new(secret: impl Into<Vec<u8>>, role: impl Into<String>) -> Self {
        Self { secret: secret.into(), role: role.into(), freshness: 300 }
    }

    pub fn sign(&self, client_id: &str, timestamp: i64, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(format!("{client_id}:{timestamp}:{body}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl AuthProvider for HmacAuth {
    fn authenticate(&self, credentials: &Credentials) -> Option<AuthContext> {
        let client_id = credentials.client_id.as_ref()?;
        let timestamp = credentials.timestamp?;
        let signature = credentials.signature.as_ref()?;
        let body = credentials.body.as_deref().unwrap_or("");

        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
        if (now - timestamp).abs() > self.freshness {
            return None;
        }

        let expected = self.sign(client_id, timestamp, body);
        if constant_time_eq_str(&expected, signature) {
            Some(AuthContext::authenticated(client_id.clone(), self.role.clone()))
        } else {
            None
        }
    }
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn method_permission(method: &str) -> Option<Permission> {
    Some(match method {
        methods::TOOLS_LIST => Permission::ToolsList,
        methods::TOOLS_CALL => Permission::ToolsCall,
        methods::RESOURCES_LIST => Permission::ResourcesList,
        methods::RESOURCES_READ | methods::RESOURCES_SUBSCRIBE | methods::RESOURCES_UNSUBSCRIBE => {
            Permission::ResourcesRead
        }
        methods::PROMPTS_LIST => Permission::PromptsList,
        methods::PROMPTS_GET => Permission::PromptsGet,
        methods::LOGGING_SET_LEVEL => Permission::AdminLogs,
        _ => return None,
    })
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub client_id: String,
    pub method: String,
    pub permission: Option<Permission>,
    pub resource: Option<String>,
    pub granted: bool,
}

type AuditSink = Box<dyn Fn(&AuditEvent) + Send + Sync>;

/// Role registry plus audit sink dispatch for authorization decisions.
pub struct Authorizer {
    roles: DashMap<String, Role>,
    audit_sinks: parking_lot::Mutex<Vec<AuditSink>>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self { roles: DashMap::new(), audit_sinks: parking_lot::Mutex::new(Vec::new()) }
    }

    pub fn register_role(&self, role: Role) {
        self.roles.insert(role.name.clone(), role);
    }

    pub fn add_audit_sink(&self, sink: impl Fn(&AuditEvent) + Send + Sync + 'static) {
        self.audit_sinks.lock().push(Box::new(sink));
    }

    fn emit(&self, event: AuditEvent) {
        for sink in self.audit_sinks.lock().iter() {
            // A sink's own panic must never take the request down with it.
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink(&event)));
        }
    }

    /// Lifecycle methods and notifications bypass authorization entirely.
    pub fn authorize(&self, ctx: &AuthContext, method: &str, tool: Option<&str>) -> bool {
        if method == methods::INITIALIZE || method == methods::SHUTDOWN || method.starts_with("notifications/") {
            return true;
        }
        let Some(permission) = method_permission(method) else {
            return true;
        };
        let granted = ctx
            .role
            .as_ref()
            .and_then(|r| self.roles.get(r))
            .map(|role| {
                role.permissions.contains(&permission)
                    && tool.map(|t| role.allows_tool(t)).unwrap_or(true)
            })
            .unwrap_or(false);

        self.emit(AuditEvent {
            client_id: ctx.client_id.clone(),
            method: method.to_string(),
            permission: Some(permission),
            resource: tool.map(String::from),
            granted,
        });
        granted
    }
}

impl Default for Authorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_auth_accepts_known_token_only() {
        let auth = BearerAuth::new([("secret".to_string(), "standard".to_string())]);
        assert!(auth.authenticate(&Credentials::bearer("secret")).is_some());
        assert!(auth.authenticate(&Credentials::bearer("wrong")).is_none());
    }

    #[test]
    fn hmac_auth_rejects_stale_timestamp() {
        let auth = HmacAuth::new(b"secret".to_vec(), "standard");
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let sig = auth.sign("client1", now - 1000, "body");
        let creds = Credentials {
            token: None,
            client_id: Some("client1".into()),
            timestamp: Some(now - 1000),
            signature: Some(sig),
            body: Some("body".into()),
        };
        assert!(auth.authenticate(&creds).is_none());
    }

    #[test]
    fn hmac_auth_accepts_fresh_valid_signature() {
        let auth = HmacAuth::new(b"secret".to_vec(), "standard");
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let sig = auth.sign("client1", now, "body");
        let creds = Credentials {
            token: None,
            client_id: Some("client1".into()),
            timestamp: Some(now),
            signature: Some(sig),
            body: Some("body".into()),
        };
        assert!(auth.authenticate(&creds).is_some());
    }

    #[test]
    fn authorize_respects_role_permissions_and_tool_denylist() {
        let authz = Authorizer::new();
        let mut role = Role::standard();
        role.tool_denylist.insert("dangerous".into());
        authz.register_role(role);
        let ctx = AuthContext::authenticated("c1", "standard");

        assert!(authz.authorize(&ctx, methods::TOOLS_CALL, Some("echo")));
        assert!(!authz.authorize(&ctx, methods::TOOLS_CALL, Some("dangerous")));
        assert!(!authz.authorize(&ctx, methods::LOGGING_SET_LEVEL, None));
    }

    #[test]
    fn lifecycle_methods_bypass_authorization() {
        let authz = Authorizer::new();
        let ctx = AuthContext::anonymous("c1");
        assert!(authz.authorize(&ctx, methods::INITIALIZE, None));
    }
}
