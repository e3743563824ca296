//! Agent orchestration state machine (C14): plan -> execute -> confirm? ->
//! verify -> retry? -> summarize.
//!
//! Re-architected from a graph-library-driven design into an explicit enum of
//! node identifiers plus a table of transition predicates (§9).

use crate::agent::confirmation::{ConfirmationManager, RiskAssessor};
use crate::agent::executor::{LlmClient, ToolBackend, ToolExecutor};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Plan,
    Execute,
    Confirm,
    Verify,
    Retry,
    Summarize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Planning,
    Executing,
    Verifying,
    AwaitingConfirmation,
    Retrying,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub id: u32,
    pub tool: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub step_id: u32,
    pub tool: String,
    pub arguments: Value,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorRecord {
    pub step_id: u32,
    pub error_type: String,
    pub message: String,
}

/// The full state threaded through every node (§3 `AgentState`).
#[derive(Debug, Clone)]
pub struct AgentState {
    pub task: String,
    pub context: HashMap<String, Value>,
    pub plan: Vec<Step>,
    pub current_step: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub errors: Vec<ErrorRecord>,
    pub retry_count: usize,
    pub max_retries: usize,
    pub retry_context: Option<Value>,
    pub verification_result: Option<String>,
    pub verification_passed: bool,
    pub requires_confirmation: bool,
    pub user_approved: bool,
    /// Index of the step a confirmation just approved, so `execute_step` can
    /// consume the approval and run the tool instead of re-assessing risk.
    approved_step: Option<usize>,
    pub status: Status,
    pub final_result: Option<String>,
}

impl AgentState {
    pub fn new(task: impl Into<String>, max_retries: usize) -> Self {
        Self {
            task: task.into(),
            context: HashMap::new(),
            plan: Vec::new(),
            current_step: 0,
            tool_calls: Vec::new(),
            errors: Vec::new(),
            retry_count: 0,
            max_retries,
            retry_context: None,
            verification_result: None,
            verification_passed: false,
            requires_confirmation: false,
            user_approved: false,
            approved_step: None,
            status: Status::Planning,
            final_result: None,
        }
    }
}

#[derive(Deserialize)]
struct PlanResponse {
    steps: Vec<Step>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    passed: bool,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RetryAnalysis {
    #[serde(default)]
    suggestions: Vec<String>,
}

pub struct Orchestrator<'a> {
    llm: &'a dyn LlmClient,
    executor: ToolExecutor<'a>,
    confirmation: Option<&'a ConfirmationManager>,
    risk_assessor: Option<&'a RiskAssessor>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(llm: &'a dyn LlmClient, backend: &'a dyn ToolBackend, max_retries: usize) -> Self {
        Self { llm, executor: ToolExecutor::new(backend, max_retries), confirmation: None, risk_assessor: None }
    }

    pub fn with_confirmation(mut self, manager: &'a ConfirmationManager, assessor: &'a RiskAssessor) -> Self {
        self.confirmation = Some(manager);
        self.risk_assessor = Some(assessor);
        self
    }

    pub async fn run(&self, task: impl Into<String>, max_retries: usize) -> AgentState {
        let mut state = AgentState::new(task, max_retries);
        let mut node = Node::Plan;
        loop {
            node = match node {
                Node::Plan => {
                    self.plan(&mut state).await;
                    Node::Execute
                }
                Node::Execute => {
                    self.execute_step(&mut state).await;
                    self.route_after_execute(&state)
                }
                Node::Confirm => {
                    self.confirm(&mut state).await;
                    self.route_after_confirm(&state)
                }
                Node::Verify => {
                    self.verify(&mut state).await;
                    self.route_after_verify(&state)
                }
                Node::Retry => {
                    self.prepare_retry(&mut state).await;
                    Node::Plan
                }
                Node::Summarize => {
                    self.summarize(&mut state).await;
                    break;
                }
            };
        }
        state
    }

    fn route_after_execute(&self, state: &AgentState) -> Node {
        if state.requires_confirmation {
            Node::Confirm
        } else if state.current_step < state.plan.len() {
            Node::Execute
        } else {
            Node::Verify
        }
    }

    fn route_after_confirm(&self, state: &AgentState) -> Node {
        if state.user_approved {
            Node::Execute
        } else {
            Node::Summarize
        }
    }

    // verification_passed and retry-budget exhaustion are distinct routing
    // conditions that happen to share a destination; keep them separate so
    // each reads against the routing table on its own.
    #[allow(clippy::if_same_then_else)]
    fn route_after_verify(&self, state: &AgentState) -> Node {
        if state.verification_passed {
            Node::Summarize
        } else if state.retry_count >= state.max_retries {
            Node::Summarize
        } else {
            Node::Retry
        }
    }

    async fn plan(&self, state: &mut AgentState) {
        state.status = Status::Planning;
        let prompt = if let Some(retry_context) = &state.retry_context {
            format!(
                "Task: {}\nPrevious attempt failed. Retry context: {retry_context}\nReply with JSON {{\"steps\": [...]}}.",
                state.task
            )
        } else {
            format!("Task: {}\nReply with JSON {{\"steps\": [{{\"id\":1,\"tool\":\"...\",\"arguments\":{{}}}}]}}.", state.task)
        };

        let response = self.llm.generate(&prompt).await.unwrap_or_default();
        state.plan = match serde_json::from_str::<PlanResponse>(&response) {
            Ok(parsed) => parsed.steps,
            Err(_) => vec![Step { id: 1, tool: "unknown".into(), description: response, arguments: json!({}), optional: false }],
        };
        state.current_step = 0;
    }

    async fn execute_step(&self, state: &mut AgentState) {
        state.status = Status::Executing;
        if state.current_step >= state.plan.len() {
            return;
        }
        let step = state.plan[state.current_step].clone();

        if state.approved_step == Some(state.current_step) {
            state.approved_step = None;
        } else if let Some(assessor) = self.risk_assessor {
            let assessment = assessor.assess(&step.tool, &step.arguments);
            if assessment.requires_confirmation {
                state.requires_confirmation = true;
                return;
            }
        }

        let outcome = self.executor.execute(&step.tool, step.arguments.clone(), None).await;
        let record = ToolCallRecord {
            step_id: step.id,
            tool: step.tool.clone(),
            arguments: step.arguments.clone(),
            result: outcome.result.as_ref().map(|r| format!("{r:?}")),
            error: outcome.error.clone(),
            duration_ms: outcome.duration_ms,
        };
        state.tool_calls.push(record);
        if let Some(error) = outcome.error {
            state.errors.push(ErrorRecord { step_id: step.id, error_type: "ToolError".into(), message: error });
        }
        state.current_step += 1;
    }

    async fn confirm(&self, state: &mut AgentState) {
        state.status = Status::AwaitingConfirmation;
        let step = &state.plan[state.current_step];
        let (Some(manager), Some(assessor)) = (self.confirmation, self.risk_assessor) else {
            state.user_approved = false;
            return;
        };
        let assessment = assessor.assess(&step.tool, &step.arguments);
        let decision = manager.request(&assessment, &step.tool, &step.arguments).await;
        state.user_approved = matches!(decision, crate::agent::confirmation::Decision::Approved { .. });
        state.requires_confirmation = false;
        if state.user_approved {
            state.approved_step = Some(state.current_step);
        }
    }

    async fn verify(&self, state: &mut AgentState) {
        state.status = Status::Verifying;
        let prompt = format!(
            "Task: {}\nResults: {:?}\nErrors: {:?}\nReply with JSON {{\"passed\": bool, \"message\": string}}.",
            state.task, state.tool_calls, state.errors
        );
        let response = self.llm.generate(&prompt).await.unwrap_or_default();
        match serde_json::from_str::<VerifyResponse>(&response) {
            Ok(parsed) => {
                state.verification_passed = parsed.passed;
                state.verification_result = Some(parsed.message);
            }
            Err(_) => {
                state.verification_passed = response.to_lowercase().contains("success");
                state.verification_result = Some(response);
            }
        }
    }

    async fn prepare_retry(&self, state: &mut AgentState) {
        state.status = Status::Retrying;
        let prompt = format!("Task: {}\nErrors: {:?}\nAnalyze root cause, reply JSON.", state.task, state.errors);
        let response = self.llm.generate(&prompt).await.unwrap_or_default();
        let suggestions = serde_json::from_str::<RetryAnalysis>(&response).map(|a| a.suggestions).unwrap_or_default();
        state.retry_context = Some(json!({ "analysis": response, "suggestions": suggestions }));
        state.retry_count += 1;
        state.plan.clear();
        state.current_step = 0;
        state.tool_calls.clear();
    }

    async fn summarize(&self, state: &mut AgentState) {
        let prompt = format!("Task: {}\nSummarize the outcome.", state.task);
        state.final_result = self.llm.generate(&prompt).await.ok();
        state.status = if state.verification_passed { Status::Complete } else { Status::Failed };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::confirmation::{AutoApprove, AutoDeny};
    use crate::types::{ToolCall, ToolResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
    }
    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _prompt: &str) -> crate::error::Result<String> {
            let mut responses = self.responses.lock().unwrap();
            Ok(if responses.is_empty() { String::new() } else { responses.remove(0) })
        }
    }

    struct EchoBackend;
    #[async_trait]
    impl ToolBackend for EchoBackend {
        async fn call(&self, _call: ToolCall) -> ToolResult {
            ToolResult::text("done")
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_complete() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                r#"{"steps":[{"id":1,"tool":"echo","arguments":{}}]}"#.into(),
                r#"{"passed": true, "message": "ok"}"#.into(),
                "All done".into(),
            ]),
        };
        let backend = EchoBackend;
        let orchestrator = Orchestrator::new(&llm, &backend, 3);
        let state = orchestrator.run("do the thing", 3).await;
        assert_eq!(state.status, Status::Complete);
        assert_eq!(state.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn retry_count_never_exceeds_max_retries() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                r#"{"steps":[{"id":1,"tool":"echo","arguments":{}}]}"#.into(),
                r#"{"passed": false, "message": "no"}"#.into(),
                r#"{"suggestions": []}"#.into(),
                r#"{"steps":[{"id":1,"tool":"echo","arguments":{}}]}"#.into(),
                r#"{"passed": false, "message": "no"}"#.into(),
                "Failed after retries".into(),
            ]),
        };
        let backend = EchoBackend;
        let orchestrator = Orchestrator::new(&llm, &backend, 1);
        let state = orchestrator.run("do the thing", 1).await;
        assert_eq!(state.status, Status::Failed);
        assert!(state.retry_count <= state.max_retries);
    }

    #[tokio::test]
    async fn confirmation_denial_routes_to_summarize_without_executing() {
        use crate::agent::confirmation::RiskAssessor;
        use crate::types::RiskLevel;

        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                r#"{"steps":[{"id":1,"tool":"filesystem.delete_file","arguments":{}}]}"#.into(),
                "Denied".into(),
            ]),
        };
        let backend = EchoBackend;
        let manager = ConfirmationManager::new(Some(Box::new(AutoDeny)));
        let assessor = RiskAssessor::new(RiskLevel::Medium);
        let orchestrator = Orchestrator::new(&llm, &backend, 3).with_confirmation(&manager, &assessor);
        let state = orchestrator.run("delete stuff", 3).await;
        assert_eq!(state.status, Status::Failed);
        assert!(state.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn confirmation_approval_runs_the_tool_and_reaches_complete() {
        use crate::agent::confirmation::RiskAssessor;
        use crate::types::RiskLevel;

        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                r#"{"steps":[{"id":1,"tool":"filesystem.delete_file","arguments":{}}]}"#.into(),
                r#"{"passed": true, "message": "ok"}"#.into(),
                "Approved and done".into(),
            ]),
        };
        let backend = EchoBackend;
        let manager = ConfirmationManager::new(Some(Box::new(AutoApprove)));
        let assessor = RiskAssessor::new(RiskLevel::Medium);
        let orchestrator = Orchestrator::new(&llm, &backend, 3).with_confirmation(&manager, &assessor);
        let state = orchestrator.run("delete stuff", 3).await;
        assert_eq!(state.status, Status::Complete);
        assert_eq!(state.tool_calls.len(), 1);
    }
}
