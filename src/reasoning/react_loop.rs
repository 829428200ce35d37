//! ReAct Engine (SPEC_FULL.md §4.9).
//!
//! Bounded think/act/observe/reflect loop grounded on the reference
//! runtime's `ReasoningLoopRunner`: each phase is journaled before the next
//! begins, and the loop is driven to a definite `done` state rather than
//! looping until a step budget with no other exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::agents::AgentRegistry;
use crate::debug::{DebugRing, RecordTrace};
use crate::events::{ChatEvent, EventBus};
use crate::llm::{GenerateRequest, LlmClient, Usage};
use crate::rag::Source;
use crate::types::{SessionId, TaskId, TaskOutcome, TraceType};

use super::strategy::ExecutionPlan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub step: u32,
    pub agent: String,
    pub action: String,
    pub input_summary: String,
    pub output_summary: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReactOutcome {
    pub final_answer: String,
    pub outcome: TaskOutcome,
    pub steps_used: u32,
    pub history: Vec<Observation>,
    pub usage: Usage,
    pub sources: Vec<Source>,
}

#[derive(Deserialize)]
struct ThoughtAction {
    thought: String,
    action: String,
    #[serde(default)]
    action_input: String,
}

fn agent_for_action(action: &str) -> &'static str {
    match action {
        "retrieve" => "rag",
        "compute" => "calculation",
        "translate" => "translation",
        "summarize" => "summarization",
        _ => "thinking",
    }
}

pub struct ReactEngine {
    llm: Arc<LlmClient>,
    registry: Arc<AgentRegistry>,
    debug: Arc<DebugRing>,
    events: Arc<EventBus>,
}

impl ReactEngine {
    pub fn new(
        llm: Arc<LlmClient>,
        registry: Arc<AgentRegistry>,
        debug: Arc<DebugRing>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            llm,
            registry,
            debug,
            events,
        }
    }

    pub async fn run(
        &self,
        session_id: SessionId,
        task_uid: TaskId,
        query: &str,
        memory_context: &str,
        plan: &ExecutionPlan,
        cancel: Arc<AtomicBool>,
    ) -> ReactOutcome {
        let mut history: Vec<Observation> = Vec::new();
        let mut transcript = String::new();
        let mut usage = Usage::default();
        let mut sources: Vec<Source> = Vec::new();

        for step in 1..=plan.max_steps {
            if cancel.load(Ordering::SeqCst) {
                return ReactOutcome {
                    final_answer: best_effort_answer(&history),
                    outcome: TaskOutcome::Cancelled,
                    steps_used: step - 1,
                    history,
                    usage,
                    sources,
                };
            }

            self.events.publish(
                session_id,
                ChatEvent::Thinking {
                    session_id,
                    task_uid: Some(task_uid),
                    stage: Some(format!("step_{step}")),
                    content: serde_json::json!("deciding next action"),
                    ts: chrono::Utc::now(),
                },
            );

            let think_prompt = format!(
                "Context:\n{memory_context}\n\nQuery: {query}\n\nSo far:\n{transcript}\n\n\
                 Decide the single next action. Respond with JSON only: \
                 {{\"thought\":\"...\",\"action\":\"retrieve|compute|translate|summarize|reason|finish\",\"action_input\":\"...\"}}."
            );

            let decision = match self
                .llm
                .generate(session_id, GenerateRequest::new(think_prompt).with_json())
                .await
            {
                Ok(resp) => {
                    usage.add(&resp.usage);
                    serde_json::from_str::<ThoughtAction>(&resp.content).ok()
                }
                Err(_) => None,
            };

            let Some(decision) = decision else {
                return ReactOutcome {
                    final_answer: best_effort_answer(&history),
                    outcome: TaskOutcome::Failure,
                    steps_used: step - 1,
                    history,
                    usage,
                    sources,
                };
            };

            if decision.action == "finish" {
                return ReactOutcome {
                    final_answer: decision.action_input,
                    outcome: TaskOutcome::Success,
                    steps_used: step,
                    history,
                    usage,
                    sources,
                };
            }

            let mut agent_name = agent_for_action(&decision.action);
            if plan.skip_agents.iter().any(|a| a == agent_name) {
                agent_name = "thinking";
            }

            if agent_name == "rag" {
                self.events.publish(
                    session_id,
                    ChatEvent::Searching {
                        session_id,
                        task_uid: Some(task_uid),
                        stage: Some(format!("step_{step}")),
                        content: serde_json::json!({ "query": decision.action_input }),
                        ts: chrono::Utc::now(),
                    },
                );
            }

            self.debug.record(RecordTrace {
                session_id,
                task_uid: Some(task_uid),
                trace_type: TraceType::AgentInput,
                agent_name: Some(agent_name.to_string()),
                source: "react_loop".into(),
                target: agent_name.into(),
                content: decision.action_input.clone(),
                duration_ms: None,
                metadata: serde_json::json!({ "step": step }),
            });

            let start = Instant::now();
            let result = self
                .registry
                .dispatch(
                    agent_name,
                    session_id,
                    decision.action_input.clone(),
                    memory_context,
                    cancel.clone(),
                )
                .await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, output_summary, error) = match &result {
                Ok(r) if r.ok => (
                    true,
                    r.value
                        .as_ref()
                        .and_then(|v| v.get("answer"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    None,
                ),
                Ok(r) => (false, String::new(), r.message.clone()),
                Err(e) => (false, String::new(), Some(e.to_string())),
            };

            if let Ok(r) = &result {
                if let Some(raw_usage) = r.value.as_ref().and_then(|v| v.get("usage")) {
                    if let Ok(step_usage) = serde_json::from_value::<Usage>(raw_usage.clone()) {
                        usage.add(&step_usage);
                    }
                }
                if agent_name == "rag" {
                    if let Some(raw_sources) = r.value.as_ref().and_then(|v| v.get("sources")) {
                        self.events.publish(
                            session_id,
                            ChatEvent::Sources {
                                session_id,
                                task_uid: Some(task_uid),
                                content: raw_sources.clone(),
                                ts: chrono::Utc::now(),
                            },
                        );
                        if let Ok(step_sources) =
                            serde_json::from_value::<Vec<Source>>(raw_sources.clone())
                        {
                            sources.extend(step_sources);
                        }
                    }
                }
            }

            self.debug.record(RecordTrace {
                session_id,
                task_uid: Some(task_uid),
                trace_type: TraceType::AgentOutput,
                agent_name: Some(agent_name.to_string()),
                source: agent_name.into(),
                target: "react_loop".into(),
                content: output_summary.clone(),
                duration_ms: Some(duration_ms),
                metadata: serde_json::json!({ "success": success }),
            });

            transcript.push_str(&format!(
                "Step {step}: {} -> {} ({})\n",
                decision.action,
                output_summary,
                if success { "ok" } else { "failed" }
            ));

            history.push(Observation {
                step,
                agent: agent_name.to_string(),
                action: decision.action.clone(),
                input_summary: decision.action_input,
                output_summary,
                duration_ms,
                success,
                error,
            });

            let (confident, reflect_usage) = self.reflect(session_id, query, &transcript).await;
            usage.add(&reflect_usage);
            if confident {
                return ReactOutcome {
                    final_answer: best_effort_answer(&history),
                    outcome: TaskOutcome::Success,
                    steps_used: step,
                    history,
                    usage,
                    sources,
                };
            }
        }

        ReactOutcome {
            final_answer: best_effort_answer(&history),
            outcome: TaskOutcome::Partial,
            steps_used: plan.max_steps,
            history,
            usage,
            sources,
        }
    }

    /// A quick LLM check on whether the accumulated evidence confidently
    /// answers the query. Any non-"yes" response (including an LLM failure)
    /// is treated as "keep going".
    async fn reflect(&self, session_id: SessionId, query: &str, transcript: &str) -> (bool, Usage) {
        let prompt = format!(
            "Query: {query}\n\nEvidence so far:\n{transcript}\n\n\
             Does this evidence confidently answer the query? Reply with exactly one word: yes or no."
        );
        match self.llm.generate(session_id, GenerateRequest::new(prompt)).await {
            Ok(resp) => (resp.content.trim().eq_ignore_ascii_case("yes"), resp.usage),
            Err(_) => (false, Usage::default()),
        }
    }
}

fn best_effort_answer(history: &[Observation]) -> String {
    if history.is_empty() {
        return "Unable to produce an answer within the step budget.".to_string();
    }
    history
        .iter()
        .rev()
        .find(|o| o.success)
        .map(|o| o.output_summary.clone())
        .unwrap_or_else(|| "Unable to produce a confident answer within the step budget.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::specialists::CasualAgent;
    use crate::agents::Agent;
    use crate::llm::MockProvider;
    use crate::types::{Category, Complexity, ExecutionMode};

    fn plan(max_steps: u32) -> ExecutionPlan {
        ExecutionPlan {
            mode: ExecutionMode::Fast,
            primary_agent: "casual".into(),
            supporting_agents: vec![],
            skip_agents: vec![],
            decompose_task: false,
            max_steps,
            require_validation: false,
            apply_patterns: vec![],
            avoid_patterns: vec![],
            reason: "test".into(),
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn finish_action_ends_the_loop_successfully() {
        let debug = Arc::new(DebugRing::new(100));
        let llm = Arc::new(LlmClient::new(
            Arc::new(MockProvider::new(
                r#"{"thought":"I know this","action":"finish","action_input":"42"}"#,
            )),
            debug.clone(),
        ));
        let registry = Arc::new(AgentRegistry::new(5));
        registry
            .register(Arc::new(CasualAgent::new(llm.clone())) as Arc<dyn Agent>)
            .await;
        let events = Arc::new(EventBus::default());
        let engine = ReactEngine::new(llm, registry, debug, events);

        let outcome = engine
            .run(
                SessionId::new(),
                TaskId::new(),
                "what is the answer",
                "",
                &plan(5),
                Arc::new(AtomicBool::new(false)),
            )
            .await;

        assert_eq!(outcome.final_answer, "42");
        assert_eq!(outcome.outcome, TaskOutcome::Success);
        assert_eq!(outcome.steps_used, 1);
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_the_first_step() {
        let debug = Arc::new(DebugRing::new(100));
        let llm = Arc::new(LlmClient::new(Arc::new(MockProvider::new("n/a")), debug.clone()));
        let registry = Arc::new(AgentRegistry::new(5));
        let events = Arc::new(EventBus::default());
        let engine = ReactEngine::new(llm, registry, debug, events);

        let outcome = engine
            .run(
                SessionId::new(),
                TaskId::new(),
                "q",
                "",
                &plan(5),
                Arc::new(AtomicBool::new(true)),
            )
            .await;

        assert_eq!(outcome.outcome, TaskOutcome::Cancelled);
        assert_eq!(outcome.steps_used, 0);
    }

    #[tokio::test]
    async fn unparseable_thought_fails_the_task() {
        let debug = Arc::new(DebugRing::new(100));
        let llm = Arc::new(LlmClient::new(Arc::new(MockProvider::new("garbage")), debug.clone()));
        let registry = Arc::new(AgentRegistry::new(5));
        let events = Arc::new(EventBus::default());
        let engine = ReactEngine::new(llm, registry, debug, events);

        let outcome = engine
            .run(
                SessionId::new(),
                TaskId::new(),
                "q",
                "",
                &plan(5),
                Arc::new(AtomicBool::new(false)),
            )
            .await;

        assert_eq!(outcome.outcome, TaskOutcome::Failure);
    }
}
