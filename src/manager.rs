//! Manager (SPEC_FULL.md §4.1): the single top-level orchestrator.
//!
//! Constructed once at process start from the ambient [`RuntimeConfig`],
//! wiring `Arc<...>` handles to every other component exactly as the
//! reference runtime's top-level orchestrator wires its subsystems.
//! `Manager::shutdown()` tears components down in the reverse order of
//! construction.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::agents::specialists::{
    CalculationAgent, CasualAgent, RagAgent, SummarizationAgent, ThinkingAgent, TranslationAgent,
    ValidationAgent,
};
use crate::agents::{Agent, AgentRegistry};
use crate::config::RuntimeConfig;
use crate::debug::DebugRing;
use crate::events::{ChatEvent, EventBus};
use crate::llm::{GenerateRequest, HttpLlmProvider, LlmClient, LlmProvider, MockProvider, Usage};
use crate::memory::{ContextOptions, Episode, MemoryManager};
use crate::rag::{InMemoryVectorStore, Source, VectorStore};
use crate::reasoning::{
    AdaptiveEvaluator, Classifier, ExperienceRecommendation, QualityController, ReactEngine,
    SelfEvaluator, StrategyAdapter,
};
use crate::store::SessionStore;
use crate::types::error::RuntimeError;
use crate::types::{
    Category, EpisodeId, Role, RuntimeResult, SessionId, TaskId, TaskOutcome, TaskStatus, UserId,
};

/// `{message, session_id?, user_id, options}` — the single inbound shape
/// every transport (HTTP, WebSocket) maps onto before calling
/// [`Manager::handle_message`].
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: String,
    pub session_id: Option<SessionId>,
    pub user_id: UserId,
    pub options: MessageOptions,
}

#[derive(Debug, Clone, Copy)]
pub struct MessageOptions {
    pub use_rag: bool,
    pub use_react: bool,
    pub use_memory: bool,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            use_rag: true,
            use_react: true,
            use_memory: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub session_id: SessionId,
    pub task_uid: TaskId,
    pub answer: String,
    pub outcome: TaskOutcome,
    pub quality_score: f32,
    pub retried: bool,
    pub sources: Vec<Source>,
    /// Set once a retried response still fails the quality gate — surfaced
    /// to callers as a visible marker rather than only the silent `outcome`
    /// downgrade to [`TaskOutcome::Partial`].
    pub quality_low: bool,
}

/// Top-level orchestrator. One instance lives for the life of the process;
/// every request borrows it through an `Arc`.
pub struct Manager {
    pub config: RuntimeConfig,
    pub store: Arc<SessionStore>,
    pub memory: Arc<MemoryManager>,
    pub debug: Arc<DebugRing>,
    pub events: Arc<EventBus>,
    pub vector_store: Arc<dyn VectorStore>,
    pub llm: Arc<LlmClient>,
    pub registry: Arc<AgentRegistry>,
    pub classifier: Classifier,
    pub quality: QualityController,
    pub react_engine: ReactEngine,
    pub adaptive_evaluator: AdaptiveEvaluator,
    cancel_tokens: DashMap<TaskId, Arc<AtomicBool>>,
    shutdown_guard: Mutex<bool>,
}

impl Manager {
    /// Wires every subsystem from `config`, registering the specialist
    /// agents once into a process-wide [`AgentRegistry`]. `llm_provider` is
    /// injected so callers can swap [`HttpLlmProvider`] for a [`MockProvider`]
    /// in tests without touching wiring order.
    pub fn new(config: RuntimeConfig, llm_provider: Arc<dyn LlmProvider>) -> Arc<Self> {
        let store = Arc::new(SessionStore::new());
        let memory = MemoryManager::new(
            config.working_memory_capacity,
            Duration::from_secs(config.pattern_cache_ttl_secs),
        );
        let debug = Arc::new(DebugRing::new(config.ring_capacity));
        let events = Arc::new(EventBus::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let llm = Arc::new(LlmClient::new(llm_provider, debug.clone()));
        let registry = Arc::new(AgentRegistry::new(config.concurrency_cap));

        let classifier = Classifier::new(llm.clone());
        let quality = QualityController::new(llm.clone());
        let react_engine = ReactEngine::new(llm.clone(), registry.clone(), debug.clone(), events.clone());

        let manager = Arc::new(Self {
            config,
            store,
            memory,
            debug,
            events,
            vector_store,
            llm,
            registry,
            classifier,
            quality,
            react_engine,
            adaptive_evaluator: AdaptiveEvaluator::new(),
            cancel_tokens: DashMap::new(),
            shutdown_guard: Mutex::new(false),
        });
        manager.register_specialists();
        manager
    }

    /// Convenience constructor for a fully offline setup (tests, demos):
    /// wires a [`MockProvider`] instead of an [`HttpLlmProvider`].
    pub fn new_with_mock(config: RuntimeConfig, fixed_response: impl Into<String>) -> Arc<Self> {
        Self::new(config, Arc::new(MockProvider::new(fixed_response)))
    }

    /// Builds an [`HttpLlmProvider`]-backed instance pointed at an
    /// OpenAI-compatible endpoint.
    pub fn new_with_http_provider(
        config: RuntimeConfig,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Arc<Self> {
        let provider = Arc::new(HttpLlmProvider::new(base_url, model, api_key));
        Self::new(config, provider)
    }

    fn register_specialists(self: &Arc<Self>) {
        let register = |agent: Arc<dyn Agent>| {
            let registry = self.registry.clone();
            tokio::spawn(async move { registry.register(agent).await });
        };
        register(Arc::new(RagAgent::new(self.llm.clone(), self.vector_store.clone())));
        register(Arc::new(ThinkingAgent::new(self.llm.clone())));
        register(Arc::new(CalculationAgent::new(self.llm.clone())));
        register(Arc::new(TranslationAgent::new(self.llm.clone())));
        register(Arc::new(SummarizationAgent::new(self.llm.clone())));
        register(Arc::new(ValidationAgent::new(self.llm.clone())));
        register(Arc::new(CasualAgent::new(self.llm.clone())));
    }

    /// Synchronous-registration variant used by callers (including tests)
    /// that cannot rely on a runtime being free to drive the `tokio::spawn`
    /// registrations started in [`Self::new`] before the first dispatch.
    pub async fn ready(self: &Arc<Self>) {
        while self.registry.list().await.len() < 7 {
            tokio::task::yield_now().await;
        }
    }

    /// The full request flow: classify, plan, load memory, execute (ReAct or
    /// single-shot), gate on quality with at most one targeted retry, record
    /// the episode, and publish the outcome.
    pub async fn handle_message(self: &Arc<Self>, input: InboundMessage) -> RuntimeResult<TaskResult> {
        let session = match input.session_id {
            Some(id) => self
                .store
                .get_session(id)
                .await
                .ok_or_else(|| RuntimeError::NotFound(format!("session {id}")))?,
            None => self.store.create_session(input.user_id.clone(), None).await,
        };
        let session_id = session.session_id;

        let task = self.store.open_task(session_id, input.message.clone()).await?;
        let task_uid = task.task_uid;
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_tokens.insert(task_uid, cancel.clone());
        self.memory.set_current_task(session_id, task_uid);

        self.events.publish(
            session_id,
            ChatEvent::Init {
                session_id,
                task_uid: Some(task_uid),
                content: serde_json::json!({ "query": input.message }),
                ts: chrono::Utc::now(),
            },
        );

        self.store
            .append_turn(session_id, Role::User, input.message.clone(), Some(task_uid))
            .await?;

        let result = self
            .run_task(session_id, task_uid, &input, cancel.clone())
            .await;

        self.cancel_tokens.remove(&task_uid);

        match result {
            Ok(task_result) => {
                self.store
                    .append_turn(
                        session_id,
                        Role::Assistant,
                        task_result.answer.clone(),
                        Some(task_uid),
                    )
                    .await?;
                self.store
                    .update_task(task_uid, |t| {
                        t.status = TaskStatus::Succeeded;
                        t.finished_at = Some(chrono::Utc::now());
                        t.quality_score = Some(task_result.quality_score);
                        t.outcome = Some(task_result.outcome);
                    })
                    .await?;
                self.events.publish(
                    session_id,
                    ChatEvent::Result {
                        session_id,
                        task_uid: Some(task_uid),
                        content: serde_json::json!({ "answer": task_result.answer }),
                        ts: chrono::Utc::now(),
                    },
                );
                Ok(task_result)
            }
            Err(e) => {
                self.store
                    .update_task(task_uid, |t| {
                        t.status = TaskStatus::Failed;
                        t.finished_at = Some(chrono::Utc::now());
                        t.outcome = Some(TaskOutcome::Failure);
                    })
                    .await
                    .ok();
                self.events.publish(
                    session_id,
                    ChatEvent::Error {
                        session_id,
                        task_uid: Some(task_uid),
                        content: serde_json::json!({ "error": e.to_string(), "code": e.code().as_str() }),
                        ts: chrono::Utc::now(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn run_task(
        self: &Arc<Self>,
        session_id: SessionId,
        task_uid: TaskId,
        input: &InboundMessage,
        cancel: Arc<AtomicBool>,
    ) -> RuntimeResult<TaskResult> {
        let started = Instant::now();
        let classification = self.classifier.classify(session_id, &input.message).await;
        let mut total_usage = classification.usage.clone();

        self.store
            .update_task(task_uid, |t| t.category = Some(classification.category))
            .await?;

        let experience = {
            let mut episodic = self.memory.episodic().lock();
            let success_patterns = episodic.get_success_patterns(classification.category, 5);
            let failure_patterns = episodic.get_failure_patterns(classification.category, 5);
            let recent_primary = episodic
                .find_similar_episodes(&input.user_id, classification.category, true, 1)
                .first()
                .and_then(|e| e.agents_involved.first().cloned());
            if success_patterns.is_empty() {
                None
            } else {
                Some(ExperienceRecommendation {
                    primary_agent: recent_primary.unwrap_or_else(|| classification.suggested_primary.clone()),
                    supporting_agents: classification.suggested_supporting.clone(),
                    confidence: classification.confidence,
                    apply_patterns: success_patterns,
                    avoid_patterns: failure_patterns,
                })
            }
        };

        let mut plan = StrategyAdapter::plan(
            classification.category,
            classification.complexity,
            &classification.suggested_primary,
            &classification.suggested_supporting,
            experience.as_ref(),
            classification.confidence,
        );
        if !input.options.use_rag {
            plan.skip_agents.push("rag".to_string());
            plan.skip_agents.sort();
            plan.skip_agents.dedup();
        }
        self.store
            .update_task(task_uid, |t| {
                t.primary_agent = Some(plan.primary_agent.clone());
                t.supporting_agents = plan.supporting_agents.clone();
            })
            .await?;

        let memory_context = if input.options.use_memory {
            let recent_turns = self.store.session_history(session_id).await.unwrap_or_default();
            self.memory.build_context(
                session_id,
                &input.user_id,
                classification.category,
                &recent_turns,
                ContextOptions {
                    include_prefs: true,
                    include_cross_session_episodes: false,
                },
            )
        } else {
            String::new()
        };

        let use_react = input.options.use_react && classification.complexity != crate::types::Complexity::Low;
        let (mut answer, mut outcome, steps_used, mut sources, mut steps) = if use_react {
            let react_outcome = self
                .react_engine
                .run(session_id, task_uid, &input.message, &memory_context, &plan, cancel.clone())
                .await;
            total_usage.add(&react_outcome.usage);
            let steps = react_outcome
                .history
                .iter()
                .map(|o| crate::memory::ExecutionStep {
                    step_number: o.step,
                    agent_name: o.agent.clone(),
                    action: o.action.clone(),
                    input_summary: o.input_summary.clone(),
                    output_summary: o.output_summary.clone(),
                    duration_ms: o.duration_ms,
                    success: o.success,
                    error_message: o.error.clone(),
                })
                .collect();
            (
                react_outcome.final_answer,
                react_outcome.outcome,
                react_outcome.steps_used,
                react_outcome.sources,
                steps,
            )
        } else {
            let primary_agent = if plan.skip_agents.iter().any(|a| a == &plan.primary_agent) {
                "thinking"
            } else {
                plan.primary_agent.as_str()
            };
            let start = Instant::now();
            let result = self
                .registry
                .dispatch(primary_agent, session_id, input.message.clone(), memory_context.clone(), cancel.clone())
                .await?;
            let duration_ms = start.elapsed().as_millis() as u64;
            let answer = result
                .value
                .as_ref()
                .and_then(|v| v.get("answer"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(raw_usage) = result.value.as_ref().and_then(|v| v.get("usage")) {
                if let Ok(step_usage) = serde_json::from_value::<Usage>(raw_usage.clone()) {
                    total_usage.add(&step_usage);
                }
            }
            let sources: Vec<Source> = result
                .value
                .as_ref()
                .and_then(|v| v.get("sources"))
                .and_then(|v| serde_json::from_value::<Vec<Source>>(v.clone()).ok())
                .unwrap_or_default();
            let outcome = if result.ok { TaskOutcome::Success } else { TaskOutcome::Failure };
            let step = crate::memory::ExecutionStep {
                step_number: 1,
                agent_name: primary_agent.to_string(),
                action: "dispatch".to_string(),
                input_summary: input.message.clone(),
                output_summary: answer.clone(),
                duration_ms,
                success: result.ok,
                error_message: result.message.clone(),
            };
            (answer, outcome, 1, sources, vec![step])
        };

        self.events.publish(
            session_id,
            ChatEvent::Evaluating {
                session_id,
                task_uid: Some(task_uid),
                stage: Some("quality".to_string()),
                content: serde_json::json!({}),
                ts: chrono::Utc::now(),
            },
        );

        let source_snippets: Vec<String> = sources.iter().map(|s| s.title.clone()).collect();
        let mut quality = self
            .quality
            .evaluate(session_id, &input.message, &answer, &source_snippets)
            .await;
        total_usage.add(&quality.usage);
        let mut retried = false;

        if quality.should_retry {
            if let Some(hint) = quality.retry_hint.clone() {
                let retry_prompt = QualityController::retry_prompt(&input.message, &hint, &source_snippets, 3);
                if let Ok(resp) = self
                    .llm
                    .generate(session_id, GenerateRequest::new(retry_prompt))
                    .await
                {
                    total_usage.add(&resp.usage);
                    answer = resp.content;
                    retried = true;
                    self.events.publish(
                        session_id,
                        ChatEvent::Evaluating {
                            session_id,
                            task_uid: Some(task_uid),
                            stage: Some("quality_retry".to_string()),
                            content: serde_json::json!({}),
                            ts: chrono::Utc::now(),
                        },
                    );
                    quality = self
                        .quality
                        .evaluate(session_id, &input.message, &answer, &source_snippets)
                        .await;
                    total_usage.add(&quality.usage);
                }
            }
        }

        let quality_low = !quality.passed;
        if !quality.passed && outcome == TaskOutcome::Success {
            outcome = TaskOutcome::Partial;
        }

        let self_eval = SelfEvaluator::evaluate(
            quality.overall,
            retried,
            steps_used,
            plan.max_steps,
            outcome == TaskOutcome::Success,
        );

        steps.sort_by_key(|s| s.step_number);

        self.memory.episodic().lock().store_episode(Episode {
            id: EpisodeId::new(),
            user_id: input.user_id.clone(),
            session_id,
            task_category: classification.category,
            task_query: input.message.clone(),
            plan_summary: plan.reason.clone(),
            agents_involved: std::iter::once(plan.primary_agent.clone())
                .chain(plan.supporting_agents.clone())
                .collect(),
            steps,
            outcome,
            final_summary: answer.clone(),
            lessons: self_eval.weaknesses.clone(),
            successful_patterns: self_eval.strengths.clone(),
            failure_patterns: self_eval.weaknesses.clone(),
            total_duration_ms: started.elapsed().as_millis() as u64,
            tokens_used: total_usage.total_tokens as u64,
            user_rating: None,
            predicted_score: self_eval.overall,
            created_at: chrono::Utc::now(),
        });

        sources.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(TaskResult {
            session_id,
            task_uid,
            answer,
            outcome,
            quality_score: quality.overall,
            retried,
            sources,
            quality_low,
        })
    }

    /// Records a user's 1..=5 rating against an episode, feeding both the
    /// episode's stored rating and the calibration offset that
    /// [`AdaptiveEvaluator::calibrate`] applies to future self-evaluations.
    pub fn rate_episode(&self, episode_id: EpisodeId, rating: u8) -> RuntimeResult<()> {
        let mut episodic = self.memory.episodic().lock();
        let predicted_score = episodic
            .get_episode(episode_id)
            .map(|e| e.predicted_score)
            .ok_or_else(|| RuntimeError::NotFound(format!("episode {episode_id}")))?;
        episodic.record_user_rating(episode_id, rating);
        drop(episodic);
        self.adaptive_evaluator.record_user_rating(rating, predicted_score);
        Ok(())
    }

    /// `interrupt(None)` stops every in-flight agent call; `interrupt(Some(task_uid))`
    /// flips only that task's token.
    pub fn interrupt(&self, task_uid: Option<TaskId>) {
        match task_uid {
            None => self.registry.interrupt_all(),
            Some(id) => {
                if let Some(token) = self.cancel_tokens.get(&id) {
                    token.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            }
        }
    }

    /// Tears components down in the reverse order of construction: the
    /// event bus and debug ring drain last since API handlers may still be
    /// reading from them during a graceful shutdown window.
    pub async fn shutdown(&self) {
        let mut guard = self.shutdown_guard.lock().await;
        if *guard {
            return;
        }
        *guard = true;
        self.registry.interrupt_all();
        tracing::info!("manager shutdown complete");
    }
}

#[allow(dead_code)]
fn _assert_category_display(c: Category) -> String {
    c.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RuntimeConfig {
        let mut cfg = RuntimeConfig::default();
        cfg.concurrency_cap = 5;
        cfg
    }

    #[tokio::test]
    async fn handle_message_creates_session_and_returns_answer() {
        let manager = Manager::new_with_mock(cfg(), r#"{"category":"simple_chat","complexity":"low","confidence":0.9,"suggested_primary":"casual","suggested_supporting":[]}"#);
        manager.ready().await;

        let result = manager
            .handle_message(InboundMessage {
                message: "hello there".into(),
                session_id: None,
                user_id: "alice".into(),
                options: MessageOptions::default(),
            })
            .await
            .unwrap();

        assert!(!result.answer.is_empty());
    }

    #[tokio::test]
    async fn handle_message_reuses_existing_session() {
        let manager = Manager::new_with_mock(cfg(), r#"{"category":"simple_chat","complexity":"low","confidence":0.9,"suggested_primary":"casual","suggested_supporting":[]}"#);
        manager.ready().await;

        let session = manager.store.create_session("bob".into(), None).await;
        let result = manager
            .handle_message(InboundMessage {
                message: "hi".into(),
                session_id: Some(session.session_id),
                user_id: "bob".into(),
                options: MessageOptions::default(),
            })
            .await
            .unwrap();

        assert_eq!(result.session_id, session.session_id);
    }

    #[tokio::test]
    async fn unknown_session_id_is_a_not_found_error() {
        let manager = Manager::new_with_mock(cfg(), "n/a");
        manager.ready().await;

        let result = manager
            .handle_message(InboundMessage {
                message: "hi".into(),
                session_id: Some(SessionId::new()),
                user_id: "bob".into(),
                options: MessageOptions::default(),
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn interrupt_all_flips_the_registry_cancel_flag() {
        let manager = Manager::new_with_mock(cfg(), "n/a");
        manager.ready().await;
        manager.interrupt(None);
        assert!(manager.registry.available_permits() <= manager.config.concurrency_cap);
    }
}
