//! Error classification and retry strategy dispatch (C12).

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Recoverable,
    Fatal,
    Unknown,
}

const TRANSIENT_WORDS: &[&str] = &[
    "timeout", "connection", "network", "temporary", "unavailable", "rate limit", "too many requests",
];
const RECOVERABLE_WORDS: &[&str] =
    &["invalid argument", "bad request", "missing parameter", "type error", "validation"];
const FATAL_WORDS: &[&str] = &[
    "permission denied",
    "unauthorized",
    "forbidden",
    "not found",
    "does not exist",
    "authentication",
];

/// Case-insensitive substring match against the three fixed word lists.
pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if FATAL_WORDS.iter().any(|w| lower.contains(w)) {
        ErrorClass::Fatal
    } else if TRANSIENT_WORDS.iter().any(|w| lower.contains(w)) {
        ErrorClass::Transient
    } else if RECOVERABLE_WORDS.iter().any(|w| lower.contains(w)) {
        ErrorClass::Recoverable
    } else {
        ErrorClass::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub should_retry: bool,
    pub modified_args: Option<Value>,
    pub wait_seconds: f64,
    pub reason: String,
    pub strategy_name: &'static str,
}

impl StrategyResult {
    fn no_retry(strategy_name: &'static str, reason: impl Into<String>) -> Self {
        Self { should_retry: false, modified_args: None, wait_seconds: 0.0, reason: reason.into(), strategy_name }
    }
}

fn apply_path_variation(attempt: usize, path: &str) -> Option<String> {
    match attempt {
        0 => Some(format!("./{path}")),
        1 => Some(path.strip_prefix("./").unwrap_or(path).to_string()),
        2 => Some(path.replace('\\', "/")),
        3 => Some(path.replace('/', "\\")),
        4 => Some(path.to_lowercase()),
        5 => Some(format!("src/{path}")),
        6 => Some(format!("lib/{path}")),
        _ => None,
    }
}

/// Select and apply the first matching strategy (ordered, first match wins).
pub fn select_strategy(message: &str, error_type: Option<&str>, attempt: usize, args: &Value) -> StrategyResult {
    let lower = message.to_lowercase();
    let error_type = error_type.unwrap_or("");

    if ["not found", "no such file", "does not exist", "cannot find", "enoent"]
        .iter()
        .any(|w| lower.contains(w))
    {
        if let Some(path) = args.get("path").and_then(Value::as_str) {
            return match apply_path_variation(attempt, path) {
                Some(variant) => {
                    let mut new_args = args.clone();
                    new_args["path"] = Value::String(variant);
                    StrategyResult {
                        should_retry: true,
                        modified_args: Some(new_args),
                        wait_seconds: 0.0,
                        reason: format!("trying path variation #{attempt}"),
                        strategy_name: "FileNotFound",
                    }
                }
                None => StrategyResult::no_retry("FileNotFound", "exhausted path variations"),
            };
        }
        return StrategyResult::no_retry("FileNotFound", "no path argument to vary");
    }

    if ["permission denied", "access denied", "eacces", "eperm"].iter().any(|w| lower.contains(w)) {
        return StrategyResult::no_retry("PermissionDenied", "permission errors are not retryable");
    }

    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline exceeded") || error_type == "TimeoutError" {
        let mut wait = (2f64.powi(attempt as i32)).min(60.0);
        if args.get("timeout").is_some() {
            wait *= 1.5;
        }
        return StrategyResult {
            should_retry: true,
            modified_args: None,
            wait_seconds: wait,
            reason: "backing off after timeout".into(),
            strategy_name: "Timeout",
        };
    }

    if ["connection refused", "connection reset", "network unreachable", "name resolution", "dns"]
        .iter()
        .any(|w| lower.contains(w))
        || error_type == "ConnectionError"
    {
        let wait = (5.0 * (attempt as f64 + 1.0)).min(30.0);
        return StrategyResult {
            should_retry: true,
            modified_args: None,
            wait_seconds: wait,
            reason: "backing off after connection error".into(),
            strategy_name: "Connection",
        };
    }

    if ["rate limit", "too many requests", "429", "quota exceeded", "throttled"].iter().any(|w| lower.contains(w)) {
        let extracted = extract_retry_after(&lower);
        let wait = extracted.unwrap_or_else(|| (30.0 * (attempt as f64 + 1.0)).min(120.0));
        return StrategyResult {
            should_retry: true,
            modified_args: None,
            wait_seconds: wait,
            reason: "waiting out rate limit".into(),
            strategy_name: "RateLimit",
        };
    }

    if ["invalid argument", "validation error", "bad request", "missing required", "type error"]
        .iter()
        .any(|w| lower.contains(w))
        || matches!(error_type, "ValueError" | "TypeError" | "ValidationError")
    {
        if let Some((field, coerced)) = coerce_field(&lower, args) {
            let mut new_args = args.clone();
            new_args[&field] = coerced;
            return StrategyResult {
                should_retry: true,
                modified_args: Some(new_args),
                wait_seconds: 0.0,
                reason: format!("coerced field \"{field}\""),
                strategy_name: "Validation",
            };
        }
        return StrategyResult::no_retry("Validation", "no coercible field found");
    }

    if error_type == "SyntaxError" || lower.contains("syntax error") {
        return StrategyResult::no_retry("SyntaxError", "needs LLM-assisted repair");
    }

    if attempt >= 3 {
        StrategyResult::no_retry("Default", "exceeded default retry budget")
    } else {
        StrategyResult {
            should_retry: true,
            modified_args: None,
            wait_seconds: 2f64.powi(attempt as i32),
            reason: "generic retry".into(),
            strategy_name: "Default",
        }
    }
}

fn extract_retry_after(message: &str) -> Option<f64> {
    let re = regex::Regex::new(r"retry.?after\D{0,5}(\d+)").ok()?;
    re.captures(message)?.get(1)?.as_str().parse().ok()
}

/// Best-effort scalar coercion (string<->int, string->bool) for a field named in the error.
fn coerce_field(message: &str, args: &Value) -> Option<(String, Value)> {
    let obj = args.as_object()?;
    for (key, value) in obj {
        if message.contains(key.as_str()) {
            if let Value::String(s) = value {
                if let Ok(i) = s.parse::<i64>() {
                    return Some((key.clone(), Value::from(i)));
                }
                if let Ok(b) = s.parse::<bool>() {
                    return Some((key.clone(), Value::Bool(b)));
                }
            } else if let Value::Number(n) = value {
                return Some((key.clone(), Value::String(n.to_string())));
            }
        }
    }
    None
}

/// A fixed JSON envelope an LLM is asked to fill in for UNKNOWN-class errors.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LlmRepair {
    pub can_fix: bool,
    #[serde(default)]
    pub new_arguments: Option<Value>,
    #[serde(default)]
    pub reason: String,
}

pub type Args = HashMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_fatal_before_transient() {
        assert_eq!(classify("Permission denied: timeout reached"), ErrorClass::Fatal);
    }

    #[test]
    fn classifies_transient_and_unknown() {
        assert_eq!(classify("Connection timeout"), ErrorClass::Transient);
        assert_eq!(classify("something weird happened"), ErrorClass::Unknown);
    }

    #[test]
    fn file_not_found_cycles_through_path_variations() {
        let args = json!({ "path": "./data.txt" });
        let r0 = select_strategy("File not found", None, 0, &args);
        assert!(r0.should_retry);
        assert_eq!(r0.modified_args.unwrap()["path"], "././data.txt");

        let r7 = select_strategy("File not found", None, 7, &args);
        assert!(!r7.should_retry);
    }

    #[test]
    fn permission_denied_never_retries() {
        let r = select_strategy("Permission denied", None, 0, &json!({}));
        assert!(!r.should_retry);
    }

    #[test]
    fn timeout_backoff_multiplies_when_timeout_arg_present() {
        let with_timeout = select_strategy("Operation timed out", None, 2, &json!({"timeout": 5}));
        let without = select_strategy("Operation timed out", None, 2, &json!({}));
        assert!((with_timeout.wait_seconds - without.wait_seconds * 1.5).abs() < 1e-9);
    }

    #[test]
    fn rate_limit_extracts_explicit_retry_after() {
        let r = select_strategy("Rate limit exceeded, retry after 17 seconds", None, 0, &json!({}));
        assert_eq!(r.wait_seconds, 17.0);
    }

    #[test]
    fn default_strategy_stops_after_three_attempts() {
        let r = select_strategy("some unclassified failure", None, 3, &json!({}));
        assert!(!r.should_retry);
    }
}
