//! Classifier (SPEC_FULL.md §4.6).
//!
//! LLM-driven with a JSON-formatted response; falls back to a deterministic
//! keyword scan when the LLM response fails to parse, in which case
//! confidence is capped at 0.5 to signal the degraded path to callers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{GenerateRequest, LlmClient, Usage};
use crate::types::{Category, Complexity, SessionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub complexity: Complexity,
    pub confidence: f32,
    pub suggested_primary: String,
    pub suggested_supporting: Vec<String>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Deserialize)]
struct RawClassification {
    category: String,
    complexity: String,
    confidence: f32,
    suggested_primary: String,
    #[serde(default)]
    suggested_supporting: Vec<String>,
}

pub struct Classifier {
    llm: Arc<LlmClient>,
}

const PROMPT_PREAMBLE: &str = "Classify this query. Respond with JSON only: \
{\"category\": one of simple_chat|rag_search|calculation|translation|summarization|analysis|planning|creative|multi_step|tool_use, \
\"complexity\": one of low|medium|high, \"confidence\": 0..1, \
\"suggested_primary\": agent name, \"suggested_supporting\": [agent names]}.";

impl Classifier {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, session_id: SessionId, query: &str) -> Classification {
        let prompt = format!("{PROMPT_PREAMBLE}\n\nQuery: {query}");
        let request = GenerateRequest::new(prompt).with_json();

        match self.llm.generate(session_id, request).await {
            Ok(resp) => {
                let mut classification = match serde_json::from_str::<RawClassification>(&resp.content) {
                    Ok(raw) => parse_raw(raw).unwrap_or_else(|| keyword_fallback(query)),
                    Err(_) => keyword_fallback(query),
                };
                classification.usage = resp.usage;
                classification
            }
            Err(_) => keyword_fallback(query),
        }
    }
}

fn parse_raw(raw: RawClassification) -> Option<Classification> {
    let category = match raw.category.as_str() {
        "simple_chat" => Category::SimpleChat,
        "rag_search" => Category::RagSearch,
        "calculation" => Category::Calculation,
        "translation" => Category::Translation,
        "summarization" => Category::Summarization,
        "analysis" => Category::Analysis,
        "planning" => Category::Planning,
        "creative" => Category::Creative,
        "multi_step" => Category::MultiStep,
        "tool_use" => Category::ToolUse,
        _ => return None,
    };
    let complexity = match raw.complexity.as_str() {
        "low" => Complexity::Low,
        "medium" => Complexity::Medium,
        "high" => Complexity::High,
        _ => return None,
    };
    Some(Classification {
        category,
        complexity,
        confidence: raw.confidence.clamp(0.0, 1.0),
        suggested_primary: raw.suggested_primary,
        suggested_supporting: raw.suggested_supporting,
        usage: Usage::default(),
    })
}

/// Deterministic keyword scan, used when the LLM path is unavailable or
/// unparseable. Confidence is capped at 0.5 to mark the degraded result.
fn keyword_fallback(query: &str) -> Classification {
    let q = query.to_lowercase();

    let (category, primary) = if q.chars().any(|c| c.is_ascii_digit())
        && ["+", "-", "*", "/", "plus", "minus", "times", "divided"]
            .iter()
            .any(|kw| q.contains(kw))
    {
        (Category::Calculation, "calculation")
    } else if ["translate", "in spanish", "in french", "in german"]
        .iter()
        .any(|kw| q.contains(kw))
    {
        (Category::Translation, "translation")
    } else if ["summarize", "summary", "tl;dr", "tldr"]
        .iter()
        .any(|kw| q.contains(kw))
    {
        (Category::Summarization, "summarization")
    } else if ["search", "find", "lookup", "document", "knowledge base"]
        .iter()
        .any(|kw| q.contains(kw))
    {
        (Category::RagSearch, "rag")
    } else if ["plan", "step by step", "roadmap"]
        .iter()
        .any(|kw| q.contains(kw))
    {
        (Category::Planning, "thinking")
    } else if ["analyze", "analysis", "compare", "evaluate"]
        .iter()
        .any(|kw| q.contains(kw))
    {
        (Category::Analysis, "thinking")
    } else {
        (Category::SimpleChat, "casual")
    };

    let complexity = if q.split_whitespace().count() > 40 {
        Complexity::High
    } else if q.split_whitespace().count() > 12 {
        Complexity::Medium
    } else {
        Complexity::Low
    };

    Classification {
        category,
        complexity,
        confidence: 0.5,
        suggested_primary: primary.to_string(),
        suggested_supporting: Vec::new(),
        usage: Usage::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugRing;
    use crate::llm::MockProvider;

    fn classifier_with(response: &str) -> Classifier {
        let llm = Arc::new(LlmClient::new(
            Arc::new(MockProvider::new(response)),
            Arc::new(DebugRing::new(10)),
        ));
        Classifier::new(llm)
    }

    #[tokio::test]
    async fn valid_json_response_is_parsed() {
        let classifier = classifier_with(
            r#"{"category":"rag_search","complexity":"medium","confidence":0.9,"suggested_primary":"rag","suggested_supporting":[]}"#,
        );
        let result = classifier.classify(SessionId::new(), "find docs about X").await;
        assert_eq!(result.category, Category::RagSearch);
        assert_eq!(result.confidence, 0.9);
    }

    #[tokio::test]
    async fn unparseable_response_falls_back_to_keyword_scan_with_capped_confidence() {
        let classifier = classifier_with("not json at all");
        let result = classifier.classify(SessionId::new(), "please summarize this").await;
        assert_eq!(result.category, Category::Summarization);
        assert!(result.confidence <= 0.5);
    }

    #[tokio::test]
    async fn keyword_fallback_detects_calculation() {
        let classifier = classifier_with("garbage");
        let result = classifier.classify(SessionId::new(), "what is 12 + 7").await;
        assert_eq!(result.category, Category::Calculation);
    }
}
