//! LLM Client (SPEC_FULL.md §4.3).
//!
//! Single async entry point over whichever provider is configured. The
//! provider's wire protocol is out of scope (§1): this module only needs a
//! trait boundary plus the debug-trace and retry discipline every caller
//! depends on, grounded on the reference runtime's `InferenceProvider`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::debug::{DebugRing, RecordTrace};
use crate::types::error::LlmError;
use crate::types::{SessionId, TraceType};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Folds another call's usage into this running total.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.3,
            max_tokens: 2048,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_json(mut self) -> Self {
        self.response_format = ResponseFormat::JsonObject;
        self
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub usage: Usage,
}

/// The provider boundary. Real deployments plug in whatever HTTP client the
/// chosen provider needs; this crate ships [`HttpLlmProvider`] as a generic
/// OpenAI-compatible chat-completions caller and [`MockProvider`] for tests.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn call(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError>;
}

pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn call(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&ChatRequest {
                model: &self.model,
                messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Provider(format!(
                "provider returned status {}",
                resp.status()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::ParseError("empty choices array".into()))?;

        let usage = parsed
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(GenerateResponse { content, usage })
    }
}

/// Deterministic stub provider for tests and for offline operation. Echoes a
/// fixed or scripted response rather than calling any external endpoint.
pub struct MockProvider {
    pub fixed_response: String,
}

impl MockProvider {
    pub fn new(fixed_response: impl Into<String>) -> Self {
        Self {
            fixed_response: fixed_response.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn call(&self, _request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        Ok(GenerateResponse {
            content: self.fixed_response.clone(),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
        })
    }
}

const MAX_ATTEMPTS: u32 = 3;

/// Wraps a [`LlmProvider`] with retry, timing and debug-trace emission so
/// every call site gets the same observability for free.
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    debug: Arc<DebugRing>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, debug: Arc<DebugRing>) -> Self {
        Self { provider, debug }
    }

    /// Retries transient provider failures with exponential backoff
    /// (100ms, 200ms, 400ms) up to [`MAX_ATTEMPTS`] before surfacing
    /// `LLM_FAILURE`.
    pub async fn generate(
        &self,
        session_id: SessionId,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, LlmError> {
        self.debug.record(RecordTrace {
            session_id,
            task_uid: None,
            trace_type: TraceType::LlmRequest,
            agent_name: None,
            source: "manager".into(),
            target: "llm".into(),
            content: request.prompt.clone(),
            duration_ms: None,
            metadata: serde_json::json!({
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }),
        });

        let start = Instant::now();
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.provider.call(&request).await {
                Ok(response) => {
                    self.debug.record(RecordTrace {
                        session_id,
                        task_uid: None,
                        trace_type: TraceType::LlmResponse,
                        agent_name: None,
                        source: "llm".into(),
                        target: "manager".into(),
                        content: response.content.clone(),
                        duration_ms: Some(start.elapsed().as_millis() as u64),
                        metadata: serde_json::json!({ "attempt": attempt + 1 }),
                    });
                    return Ok(response);
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_ATTEMPTS {
                        let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| LlmError::Provider("unknown failure".into()));
        self.debug.record(RecordTrace {
            session_id,
            task_uid: None,
            trace_type: TraceType::Error,
            agent_name: None,
            source: "llm".into(),
            target: "manager".into(),
            content: err.to_string(),
            duration_ms: Some(start.elapsed().as_millis() as u64),
            metadata: serde_json::Value::Null,
        });
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_roundtrips_through_client() {
        let debug = Arc::new(DebugRing::new(100));
        let client = LlmClient::new(Arc::new(MockProvider::new("hello back")), debug.clone());
        let response = client
            .generate(SessionId::new(), GenerateRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(response.content, "hello back");
        assert_eq!(debug.len(), 2);
    }

    struct FailingProvider {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn call(&self, _request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(LlmError::Provider("down".into()))
        }
    }

    #[tokio::test]
    async fn exhausts_retries_then_surfaces_error() {
        let debug = Arc::new(DebugRing::new(100));
        let provider = Arc::new(FailingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let client = LlmClient::new(provider.clone(), debug);
        let result = client
            .generate(SessionId::new(), GenerateRequest::new("hi"))
            .await;
        assert!(result.is_err());
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
