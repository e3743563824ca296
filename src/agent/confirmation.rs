//! Risk classification and user-approval protocol for tool invocations (C13).

use crate::types::RiskLevel;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const DANGEROUS_COMMANDS: &[&str] = &[
    "rm", "rmdir", "del", "deltree", "sudo", "runas", "chmod", "chown", "format", "mkfs", "dd", "fdisk", "shutdown",
    "reboot", "kill", "killall", "taskkill", "git push", "git reset",
];

/// Base risk table for known tool names, grounded on the reference registry.
pub fn base_risk_table() -> HashMap<&'static str, RiskLevel> {
    HashMap::from([
        ("filesystem.read_file", RiskLevel::Safe),
        ("filesystem.list_directory", RiskLevel::Safe),
        ("filesystem.write_file", RiskLevel::Medium),
        ("filesystem.create_directory", RiskLevel::Medium),
        ("filesystem.delete_file", RiskLevel::High),
        ("filesystem.move_file", RiskLevel::Medium),
        ("terminal.run_command", RiskLevel::Medium),
        ("memory.search", RiskLevel::Safe),
        ("memory.store", RiskLevel::Low),
        ("browser.scrape_page", RiskLevel::Low),
        ("git.commit", RiskLevel::Low),
        ("git.push", RiskLevel::Medium),
        ("git.force_push", RiskLevel::Critical),
        ("git.reset_hard", RiskLevel::Critical),
        ("system.shutdown", RiskLevel::Critical),
        ("system.modify_env", RiskLevel::Critical),
    ])
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reason: String,
    pub requires_confirmation: bool,
    pub impact_description: String,
    pub affected_resources: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TrustRule {
    pub tool: Option<String>,
    pub tool_prefix: Option<String>,
    pub arguments: Option<HashMap<String, Value>>,
}

impl TrustRule {
    fn matches(&self, tool: &str, args: &Value) -> bool {
        if let Some(exact) = &self.tool {
            if exact != tool {
                return false;
            }
        }
        if let Some(prefix) = &self.tool_prefix {
            if !tool.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(required) = &self.arguments {
            for (key, expected) in required {
                if args.get(key) != Some(expected) {
                    return false;
                }
            }
        }
        true
    }
}

pub struct RiskAssessor {
    table: HashMap<&'static str, RiskLevel>,
    trusted_tools: HashSet<String>,
    trust_rules: Vec<TrustRule>,
    threshold: RiskLevel,
}

impl RiskAssessor {
    pub fn new(threshold: RiskLevel) -> Self {
        Self { table: base_risk_table(), trusted_tools: HashSet::new(), trust_rules: Vec::new(), threshold }
    }

    pub fn trust_tool(&mut self, tool: impl Into<String>) {
        self.trusted_tools.insert(tool.into());
    }

    pub fn untrust_tool(&mut self, tool: &str) {
        self.trusted_tools.remove(tool);
    }

    pub fn add_trust_rule(&mut self, rule: TrustRule) {
        self.trust_rules.push(rule);
    }

    fn is_trusted(&self, tool: &str, args: &Value) -> bool {
        self.trusted_tools.contains(tool) || self.trust_rules.iter().any(|r| r.matches(tool, args))
    }

    /// Base level + elevation rules: dangerous terminal commands and any
    /// argument value containing "sudo" escalate to HIGH; unknown tools
    /// default to MEDIUM.
    fn level_for(&self, tool: &str, args: &Value) -> RiskLevel {
        let base = self.table.get(tool).copied().unwrap_or(RiskLevel::Medium);

        if tool.starts_with("terminal.") {
            if let Some(command) = args.get("command").and_then(Value::as_str) {
                let lower = command.to_lowercase();
                if DANGEROUS_COMMANDS.iter().any(|c| lower.contains(c)) {
                    return base.max(RiskLevel::High);
                }
            }
        }

        if args_contain_sudo(args) {
            return base.max(RiskLevel::High);
        }

        base
    }

    pub fn assess(&self, tool: &str, args: &Value) -> RiskAssessment {
        let level = self.level_for(tool, args);
        let trusted = self.is_trusted(tool, args);
        RiskAssessment {
            level,
            reason: format!("{tool} classified as {level:?}"),
            requires_confirmation: level >= self.threshold && !trusted,
            impact_description: describe_impact(tool),
            affected_resources: affected_resources(args),
        }
    }
}

fn args_contain_sudo(args: &Value) -> bool {
    match args {
        Value::Object(obj) => obj.values().any(args_contain_sudo),
        Value::String(s) => s.to_lowercase().contains("sudo"),
        _ => false,
    }
}

fn describe_impact(tool: &str) -> String {
    if tool.contains("delete") {
        "Permanently removes data".into()
    } else if tool.contains("write") || tool.contains("create") {
        "Creates or modifies a resource".into()
    } else if tool.starts_with("terminal.") {
        "Executes a shell command".into()
    } else if tool.contains("push") || tool.contains("reset") {
        "Rewrites shared version-control history".into()
    } else {
        "No significant side effects expected".into()
    }
}

fn affected_resources(args: &Value) -> Vec<String> {
    const KEYS: &[&str] = &["path", "file", "directory", "source", "destination", "command"];
    let Value::Object(obj) = args else { return Vec::new() };
    KEYS.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str).map(String::from))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved { trust_future: bool },
    Denied { reason: String },
    Aborted,
}

pub trait ConfirmationPrompter: Send + Sync {
    fn prompt(&self, message: &str) -> Option<String>;
}

pub struct AutoApprove;
impl ConfirmationPrompter for AutoApprove {
    fn prompt(&self, _message: &str) -> Option<String> {
        Some("y".into())
    }
}

pub struct AutoDeny;
impl ConfirmationPrompter for AutoDeny {
    fn prompt(&self, _message: &str) -> Option<String> {
        Some("n".into())
    }
}

pub struct ConfirmationManager {
    prompter: Option<Box<dyn ConfirmationPrompter>>,
    pub default_timeout: Duration,
    pub auto_deny_on_timeout: bool,
    history: parking_lot::Mutex<Vec<(String, Decision)>>,
    counter: std::sync::atomic::AtomicU64,
}

impl ConfirmationManager {
    pub fn new(prompter: Option<Box<dyn ConfirmationPrompter>>) -> Self {
        Self {
            prompter,
            default_timeout: Duration::from_secs(60),
            auto_deny_on_timeout: true,
            history: parking_lot::Mutex::new(Vec::new()),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn build_prompt(assessment: &RiskAssessment, tool: &str, args: &Value) -> String {
        let emoji = match assessment.level {
            RiskLevel::Safe => "✅",
            RiskLevel::Low => "🔵",
            RiskLevel::Medium => "🟡",
            RiskLevel::High => "🟠",
            RiskLevel::Critical => "🔴",
        };
        let mut prompt = format!(
            "{emoji} {tool} [{:?}] — {}\naffected: {:?}",
            assessment.level, assessment.impact_description, assessment.affected_resources
        );
        if assessment.level >= RiskLevel::High {
            prompt.push_str(&format!("\narguments: {args}"));
        }
        prompt.push_str("\n[y]es / [t]rust / [n]o / [a]bort");
        prompt
    }

    fn parse_response(response: &str) -> Decision {
        match response.to_lowercase().trim() {
            "y" | "yes" | "ok" | "approve" => Decision::Approved { trust_future: false },
            "t" | "trust" => Decision::Approved { trust_future: true },
            "n" | "no" | "deny" => Decision::Denied { reason: "User denied".into() },
            "a" | "abort" => Decision::Aborted,
            _ => Decision::Denied { reason: "Unknown response, denied for safety".into() },
        }
    }

    pub async fn request(&self, assessment: &RiskAssessment, tool: &str, args: &Value) -> Decision {
        let request_id = format!("confirm_{}", self.counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        let message = Self::build_prompt(assessment, tool, args);

        let decision = match &self.prompter {
            None => {
                if assessment.level <= RiskLevel::Low {
                    Decision::Approved { trust_future: false }
                } else {
                    Decision::Denied { reason: "No confirmation prompter configured".into() }
                }
            }
            Some(prompter) => match tokio::time::timeout(self.default_timeout, async { prompter.prompt(&message) }).await {
                Ok(Some(response)) => Self::parse_response(&response),
                Ok(None) | Err(_) => Decision::Denied {
                    reason: if self.auto_deny_on_timeout { "Timeout - auto-denied".into() } else { "Timeout - auto-approved".into() },
                },
            },
        };

        self.history.lock().push((request_id, decision.clone()));
        decision
    }

    pub fn history(&self) -> Vec<(String, Decision)> {
        self.history.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_file_defaults_to_high_risk() {
        let assessor = RiskAssessor::new(RiskLevel::Medium);
        let assessment = assessor.assess("filesystem.delete_file", &json!({"path": "/tmp/x"}));
        assert_eq!(assessment.level, RiskLevel::High);
        assert!(assessment.requires_confirmation);
    }

    #[test]
    fn sudo_in_any_argument_elevates_to_high() {
        let assessor = RiskAssessor::new(RiskLevel::Medium);
        let assessment = assessor.assess("filesystem.write_file", &json!({"content": "please sudo this"}));
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn trusted_tool_skips_confirmation() {
        let mut assessor = RiskAssessor::new(RiskLevel::Medium);
        assessor.trust_tool("filesystem.delete_file");
        let assessment = assessor.assess("filesystem.delete_file", &json!({}));
        assert!(!assessment.requires_confirmation);
    }

    #[test]
    fn trust_rule_by_prefix_matches() {
        let mut assessor = RiskAssessor::new(RiskLevel::Low);
        assessor.add_trust_rule(TrustRule { tool_prefix: Some("filesystem.read".into()), ..Default::default() });
        let assessment = assessor.assess("filesystem.read_file", &json!({}));
        assert!(!assessment.requires_confirmation);
    }

    #[tokio::test]
    async fn auto_confirmation_manager_denies_high_risk_by_default() {
        let manager = ConfirmationManager::new(None);
        let assessor = RiskAssessor::new(RiskLevel::Medium);
        let assessment = assessor.assess("filesystem.delete_file", &json!({}));
        let decision = manager.request(&assessment, "filesystem.delete_file", &json!({})).await;
        assert!(matches!(decision, Decision::Denied { .. }));
    }

    #[tokio::test]
    async fn response_parsing_matches_fixed_vocabulary() {
        let manager = ConfirmationManager::new(Some(Box::new(AutoApprove)));
        let assessor = RiskAssessor::new(RiskLevel::Safe);
        let assessment = assessor.assess("filesystem.read_file", &json!({}));
        let decision = manager.request(&assessment, "filesystem.read_file", &json!({})).await;
        assert_eq!(decision, Decision::Approved { trust_future: false });
    }
}
