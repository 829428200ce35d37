//! Quality Controller (SPEC_FULL.md §4.10).
//!
//! Scores a candidate response on a strict five-axis JSON rubric. Fails
//! open on its own validation error: rather than blocking the response
//! pipeline when the rubric call itself breaks, it returns a passing report
//! with `quality_score=0.7` and an issue naming the validation error —
//! matching the original quality gate's fail-open payload exactly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{GenerateRequest, LlmClient, Usage};
use crate::types::SessionId;

pub const PASS_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub relevance: f32,
    pub completeness: f32,
    pub accuracy_signals: f32,
    pub language_match: f32,
    pub harmful_content_free: f32,
    pub overall: f32,
    pub passed: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub should_retry: bool,
    pub retry_hint: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Deserialize)]
struct RawRubric {
    relevance: f32,
    completeness: f32,
    accuracy_signals: f32,
    language_match: f32,
    harmful_content_free: f32,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    retry_hint: Option<String>,
}

const RUBRIC_PROMPT: &str = "You are a strict response quality grader. Score the candidate response \
on five axes, each in [0,1]: relevance, completeness, accuracy_signals, language_match, harmful_content_free. \
Respond with JSON only: {\"relevance\":..,\"completeness\":..,\"accuracy_signals\":..,\"language_match\":..,\
\"harmful_content_free\":..,\"issues\":[..],\"suggestions\":[..],\"retry_hint\":null or \"...\"}.";

pub struct QualityController {
    llm: Arc<LlmClient>,
}

impl QualityController {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn evaluate(
        &self,
        session_id: SessionId,
        query: &str,
        candidate_response: &str,
        sources: &[String],
    ) -> QualityReport {
        let sources_block = if sources.is_empty() {
            String::new()
        } else {
            format!("\n\nSources:\n{}", sources.join("\n---\n"))
        };
        let prompt = format!(
            "{RUBRIC_PROMPT}\n\nQuery: {query}\n\nCandidate response: {candidate_response}{sources_block}"
        );

        let request = GenerateRequest::new(prompt).with_json();
        match self.llm.generate(session_id, request).await {
            Ok(resp) => {
                let mut report = match serde_json::from_str::<RawRubric>(&resp.content) {
                    Ok(raw) => score(raw),
                    Err(e) => fail_open(format!("Validation error: {e}")),
                };
                report.usage = resp.usage;
                report
            }
            Err(e) => fail_open(format!("Validation error: {e}")),
        }
    }

    /// Builds a targeted retry prompt incorporating the retry hint and top-k
    /// source snippets — not a full pipeline re-run.
    pub fn retry_prompt(query: &str, retry_hint: &str, sources: &[String], top_k: usize) -> String {
        let snippets = sources
            .iter()
            .take(top_k)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n---\n");
        format!(
            "Revise the answer to: {query}\n\nFeedback to address: {retry_hint}\n\nRelevant sources:\n{snippets}"
        )
    }
}

fn score(raw: RawRubric) -> QualityReport {
    let axes = [
        raw.relevance,
        raw.completeness,
        raw.accuracy_signals,
        raw.language_match,
        raw.harmful_content_free,
    ];
    let overall = axes.iter().sum::<f32>() / axes.len() as f32;
    let passed = overall >= PASS_THRESHOLD;
    QualityReport {
        relevance: raw.relevance,
        completeness: raw.completeness,
        accuracy_signals: raw.accuracy_signals,
        language_match: raw.language_match,
        harmful_content_free: raw.harmful_content_free,
        overall,
        passed,
        issues: raw.issues,
        suggestions: raw.suggestions,
        should_retry: !passed && overall < 0.6,
        retry_hint: raw.retry_hint,
        usage: Usage::default(),
    }
}

fn fail_open(issue: String) -> QualityReport {
    QualityReport {
        relevance: 0.7,
        completeness: 0.7,
        accuracy_signals: 0.7,
        language_match: 0.7,
        harmful_content_free: 0.7,
        overall: 0.7,
        passed: true,
        issues: vec![issue],
        suggestions: Vec::new(),
        should_retry: false,
        retry_hint: None,
        usage: Usage::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugRing;
    use crate::llm::MockProvider;

    fn controller_with(response: &str) -> QualityController {
        let llm = Arc::new(LlmClient::new(
            Arc::new(MockProvider::new(response)),
            Arc::new(DebugRing::new(10)),
        ));
        QualityController::new(llm)
    }

    #[tokio::test]
    async fn passing_rubric_yields_passed_report() {
        let controller = controller_with(
            r#"{"relevance":0.9,"completeness":0.9,"accuracy_signals":0.9,"language_match":1.0,"harmful_content_free":1.0,"issues":[],"suggestions":[]}"#,
        );
        let report = controller.evaluate(SessionId::new(), "q", "a", &[]).await;
        assert!(report.passed);
        assert!(!report.should_retry);
    }

    #[tokio::test]
    async fn failing_rubric_marks_should_retry() {
        let controller = controller_with(
            r#"{"relevance":0.2,"completeness":0.2,"accuracy_signals":0.2,"language_match":0.2,"harmful_content_free":0.2,"issues":["too vague"],"suggestions":[],"retry_hint":"add specifics"}"#,
        );
        let report = controller.evaluate(SessionId::new(), "q", "a", &[]).await;
        assert!(!report.passed);
        assert!(report.should_retry);
        assert_eq!(report.retry_hint.as_deref(), Some("add specifics"));
    }

    #[tokio::test]
    async fn malformed_rubric_response_fails_open_at_0_7() {
        let controller = controller_with("not json");
        let report = controller.evaluate(SessionId::new(), "q", "a", &[]).await;
        assert!(report.passed);
        assert_eq!(report.overall, 0.7);
        assert!(report.issues[0].starts_with("Validation error"));
    }
}
