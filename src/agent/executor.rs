//! Tool invocation with retry (C11): wraps a backend (registry or client) in
//! a retry loop driven by [`crate::agent::retry`] classification/strategies.

use crate::agent::retry::{classify, select_strategy, ErrorClass, LlmRepair};
use crate::types::{ToolCall, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn call(&self, call: ToolCall) -> ToolResult;
}

/// The capability interface the orchestrator and executor see an LLM through —
/// a single `generate(prompt) -> text` method, matching the re-architected
/// duck-typed `generate`/`generate_async` dispatch from the source system.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> crate::error::Result<String>;
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub error: Option<String>,
    pub strategy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub result: Option<ToolResult>,
    pub error: Option<String>,
    pub duration_ms: u128,
    pub attempts: usize,
    pub history: Vec<Attempt>,
}

pub struct ToolExecutor<'a> {
    backend: &'a dyn ToolBackend,
    llm: Option<&'a dyn LlmClient>,
    max_retries: usize,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(backend: &'a dyn ToolBackend, max_retries: usize) -> Self {
        Self { backend, llm: None, max_retries }
    }

    pub fn with_llm(mut self, llm: &'a dyn LlmClient) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn execute(&self, tool: &str, initial_args: Value, timeout: Option<Duration>) -> ExecutionResult {
        let start = Instant::now();
        let mut args = initial_args;
        let mut history = Vec::new();

        for attempt in 0..=self.max_retries {
            let call = ToolCall { name: tool.to_string(), arguments: args.clone(), call_id: None };
            let outcome = match timeout {
                Some(d) => tokio::time::timeout(d, self.backend.call(call)).await.ok(),
                None => Some(self.backend.call(call).await),
            };

            let result = match outcome {
                None => {
                    history.push(Attempt { error: Some("timed out".into()), strategy: None });
                    continue;
                }
                Some(r) => r,
            };

            if !result.is_error {
                return ExecutionResult {
                    success: true,
                    result: Some(result),
                    error: None,
                    duration_ms: start.elapsed().as_millis(),
                    attempts: attempt + 1,
                    history,
                };
            }

            let message = result
                .content
                .iter()
                .filter_map(|c| match c {
                    crate::types::ToolContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("; ");

            // A fatal classification only short-circuits when no ordered strategy
            // below (e.g. FileNotFound's path variations) would otherwise retry it —
            // the strategy table is more specific than the coarse word-list taxonomy.
            let strategy = select_strategy(&message, None, attempt, &args);
            history.push(Attempt { error: Some(message.clone()), strategy: Some(strategy.strategy_name.to_string()) });

            if !strategy.should_retry && classify(&message) == ErrorClass::Fatal {
                return ExecutionResult {
                    success: false,
                    result: Some(result),
                    error: Some(message),
                    duration_ms: start.elapsed().as_millis(),
                    attempts: attempt + 1,
                    history,
                };
            }

            if !strategy.should_retry {
                if classify(&message) == ErrorClass::Unknown {
                    if let Some(llm) = self.llm {
                        if let Some(repaired) = self.try_llm_repair(llm, &message, &args).await {
                            args = repaired;
                            continue;
                        }
                    }
                }
                return ExecutionResult {
                    success: false,
                    result: Some(result),
                    error: Some(message),
                    duration_ms: start.elapsed().as_millis(),
                    attempts: attempt + 1,
                    history,
                };
            }

            if strategy.wait_seconds > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(strategy.wait_seconds)).await;
            }
            // LLM repair and strategy-driven argument mutation are mutually
            // exclusive per attempt: a strategy that already modified the
            // arguments takes precedence over asking the LLM.
            if let Some(modified) = strategy.modified_args {
                args = modified;
            }

            if attempt == self.max_retries {
                return ExecutionResult {
                    success: false,
                    result: Some(result),
                    error: Some(message),
                    duration_ms: start.elapsed().as_millis(),
                    attempts: attempt + 1,
                    history,
                };
            }
        }

        ExecutionResult {
            success: false,
            result: None,
            error: Some("exhausted retries".into()),
            duration_ms: start.elapsed().as_millis(),
            attempts: self.max_retries + 1,
            history,
        }
    }

    async fn try_llm_repair(&self, llm: &dyn LlmClient, message: &str, args: &Value) -> Option<Value> {
        let prompt = format!(
            "A tool call failed with error: {message}\nCurrent arguments: {args}\n\
             Reply with JSON {{\"can_fix\": bool, \"new_arguments\": object, \"reason\": string}}."
        );
        let text = llm.generate(&prompt).await.ok()?;
        let repair: LlmRepair = serde_json::from_str(&text).ok()?;
        if repair.can_fix {
            repair.new_arguments
        } else {
            None
        }
    }

    /// Sequential batch execution, stopping at the first failure when `stop_on_error`.
    pub async fn execute_plan(&self, steps: &[(String, Value)], stop_on_error: bool) -> Vec<ExecutionResult> {
        let mut results = Vec::new();
        for (tool, args) in steps {
            let result = self.execute(tool, args.clone(), None).await;
            let failed = !result.success;
            results.push(result);
            if failed && stop_on_error {
                break;
            }
        }
        results
    }

    /// Concurrent batch execution; all steps run regardless of individual failure.
    pub async fn execute_parallel(&self, steps: &[(String, Value)]) -> Vec<ExecutionResult> {
        let futures = steps.iter().map(|(tool, args)| self.execute(tool, args.clone(), None));
        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FlakyThenOk {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolBackend for FlakyThenOk {
        async fn call(&self, _call: ToolCall) -> ToolResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                ToolResult::error("Temporary network error")
            } else {
                ToolResult::text("ok")
            }
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let backend = FlakyThenOk { calls: AtomicUsize::new(0) };
        let executor = ToolExecutor::new(&backend, 3);
        let result = executor.execute("flaky", serde_json::json!({}), None).await;
        assert!(result.success);
        assert_eq!(result.attempts, 2);
    }

    struct AlwaysPermissionDenied;
    #[async_trait]
    impl ToolBackend for AlwaysPermissionDenied {
        async fn call(&self, _call: ToolCall) -> ToolResult {
            ToolResult::error("Permission denied")
        }
    }

    #[tokio::test]
    async fn fatal_error_short_circuits_without_retry() {
        let backend = AlwaysPermissionDenied;
        let executor = ToolExecutor::new(&backend, 5);
        let result = executor.execute("restricted", serde_json::json!({}), None).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
    }

    struct RecordingBackend {
        seen_args: Mutex<Vec<Value>>,
    }
    #[async_trait]
    impl ToolBackend for RecordingBackend {
        async fn call(&self, call: ToolCall) -> ToolResult {
            self.seen_args.lock().unwrap().push(call.arguments.clone());
            if self.seen_args.lock().unwrap().len() < 2 {
                ToolResult::error("File not found: ./x.txt")
            } else {
                ToolResult::text("found")
            }
        }
    }

    #[tokio::test]
    async fn file_not_found_mutates_path_between_attempts() {
        let backend = RecordingBackend { seen_args: Mutex::new(Vec::new()) };
        let executor = ToolExecutor::new(&backend, 3);
        let result = executor.execute("read", serde_json::json!({"path": "x.txt"}), None).await;
        assert!(result.success);
        let seen = backend.seen_args.lock().unwrap();
        assert_ne!(seen[0]["path"], seen[1]["path"]);
    }
}
