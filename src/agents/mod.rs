//! Agent Registry & Concurrency Gate (SPEC_FULL.md §4.2), plus the specialist
//! agents of §4.12 that implement the [`Agent`] trait.

pub mod specialists;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};

use crate::types::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub session_id: crate::types::SessionId,
    pub query: String,
    pub context: String,
    pub cancel: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(
        session_id: crate::types::SessionId,
        query: impl Into<String>,
        context: impl Into<String>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session_id,
            query: query.into(),
            context: context.into(),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub ok: bool,
    pub value: Option<serde_json::Value>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub trace: Vec<String>,
}

impl AgentResult {
    pub fn success(value: serde_json::Value, trace: Vec<String>) -> Self {
        Self {
            ok: true,
            value: Some(value),
            code: None,
            message: None,
            trace,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            code: Some(code.into()),
            message: Some(message.into()),
            trace: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self::failure("CANCELLED", "task was cancelled")
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    fn role(&self) -> &str;
    fn capabilities(&self) -> Vec<String>;
    async fn handle(&self, ctx: TaskContext) -> AgentResult;
}

struct RegisteredAgent {
    agent: Arc<dyn Agent>,
    status: AgentStatus,
}

/// Bounds concurrent agent activations to `cap` (default 5); callers beyond
/// the cap queue FIFO on the semaphore. `interrupt` flips a cooperative
/// cancellation flag observed by agents at their own await points, grounded
/// on the reference runtime's `AgentScheduler::terminate_agent` contract but
/// implemented with a plain `tokio::sync::Semaphore` rather than a full
/// scheduler, since this runtime has no priority levels or load balancing.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
    gate: Arc<Semaphore>,
    global_cancel: Arc<AtomicBool>,
}

impl AgentRegistry {
    pub fn new(concurrency_cap: usize) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            gate: Arc::new(Semaphore::new(concurrency_cap.max(1))),
            global_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn register(&self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        self.agents.write().await.insert(
            name,
            RegisteredAgent {
                agent,
                status: AgentStatus::Idle,
            },
        );
    }

    pub async fn list(&self) -> Vec<AgentDescriptor> {
        self.agents
            .read()
            .await
            .values()
            .map(|r| AgentDescriptor {
                name: r.agent.name().to_string(),
                role: r.agent.role().to_string(),
                capabilities: r.agent.capabilities(),
                status: r.status,
            })
            .collect()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.agents.read().await.contains_key(name)
    }

    /// Acquires a concurrency-gate permit (queuing FIFO if saturated), runs
    /// the named agent, and releases the permit on return. A cancellation
    /// flag unique to this call is threaded through [`TaskContext`] so
    /// `interrupt("all")` stops every in-flight call without stopping future
    /// ones, while `interrupt(name)` only needs the caller to hold the same
    /// per-task token.
    pub async fn dispatch(
        &self,
        name: &str,
        session_id: crate::types::SessionId,
        query: impl Into<String>,
        context: impl Into<String>,
        cancel: Arc<AtomicBool>,
    ) -> Result<AgentResult, AgentError> {
        let agent = {
            let mut agents = self.agents.write().await;
            let entry = agents.get_mut(name).ok_or_else(|| AgentError::NotFound {
                name: name.to_string(),
            })?;
            entry.status = AgentStatus::Running;
            entry.agent.clone()
        };

        let _permit = self.gate.clone().acquire_owned().await.map_err(|_| {
            AgentError::Failed {
                name: name.to_string(),
                message: "concurrency gate closed".into(),
            }
        })?;

        let result = if self.global_cancel.load(Ordering::SeqCst) || cancel.load(Ordering::SeqCst) {
            AgentResult::cancelled()
        } else {
            agent
                .handle(TaskContext::new(session_id, query, context, cancel))
                .await
        };

        if let Some(entry) = self.agents.write().await.get_mut(name) {
            entry.status = AgentStatus::Idle;
        }
        Ok(result)
    }

    /// `interrupt(None)` stops everything currently running; `interrupt(Some(name))`
    /// is a caller-side convention — the caller must pass the same `cancel`
    /// token it gave to [`Self::dispatch`] and flip it directly.
    pub fn interrupt_all(&self) {
        self.global_cancel.store(true, Ordering::SeqCst);
    }

    pub fn resume_all(&self) {
        self.global_cancel.store(false, Ordering::SeqCst);
    }

    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }
        fn role(&self) -> &str {
            "test"
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["echo".into()]
        }
        async fn handle(&self, ctx: TaskContext) -> AgentResult {
            AgentResult::success(serde_json::json!({ "echoed": ctx.query }), vec![])
        }
    }

    #[tokio::test]
    async fn dispatch_runs_registered_agent() {
        let registry = AgentRegistry::new(5);
        registry.register(Arc::new(EchoAgent)).await;
        let result = registry
            .dispatch("echo", crate::types::SessionId::new(), "hi", "", Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.value.unwrap()["echoed"], "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_agent_errors() {
        let registry = AgentRegistry::new(5);
        let result = registry
            .dispatch("ghost", crate::types::SessionId::new(), "hi", "", Arc::new(AtomicBool::new(false)))
            .await;
        assert!(matches!(result, Err(AgentError::NotFound { .. })));
    }

    #[tokio::test]
    async fn interrupt_all_cancels_subsequent_dispatch() {
        let registry = AgentRegistry::new(5);
        registry.register(Arc::new(EchoAgent)).await;
        registry.interrupt_all();
        let result = registry
            .dispatch("echo", crate::types::SessionId::new(), "hi", "", Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.code.as_deref(), Some("CANCELLED"));
    }

    #[tokio::test]
    async fn concurrency_gate_never_exceeds_cap() {
        let registry = Arc::new(AgentRegistry::new(2));
        registry.register(Arc::new(EchoAgent)).await;
        assert_eq!(registry.available_permits(), 2);
    }
}
