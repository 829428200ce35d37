//! Request/response DTOs for the HTTP and WebSocket surfaces
//! (SPEC_FULL.md §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::manager::MessageOptions;
use crate::rag::Source;
use crate::types::{SessionId, StepType, TaskId};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_s: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ManifestResponse {
    pub name: String,
    pub version: String,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatOptionsDto {
    #[serde(default = "default_true")]
    pub use_rag: bool,
    #[serde(default = "default_true")]
    pub use_react: bool,
    #[serde(default = "default_true")]
    pub use_memory: bool,
    #[serde(default)]
    pub r#async: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChatOptionsDto {
    fn default() -> Self {
        Self {
            use_rag: true,
            use_react: true,
            use_memory: true,
            r#async: false,
        }
    }
}

impl From<ChatOptionsDto> for MessageOptions {
    fn from(dto: ChatOptionsDto) -> Self {
        Self {
            use_rag: dto.use_rag,
            use_react: dto.use_react,
            use_memory: dto.use_memory,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatSendRequest {
    pub message: String,
    pub session_id: Option<SessionId>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub options: ChatOptionsDto,
}

#[derive(Debug, Serialize)]
pub struct SourceDto {
    pub id: String,
    pub title: String,
    pub score: f32,
}

impl From<Source> for SourceDto {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            title: s.title,
            score: s.score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatSendResponse {
    pub task_uid: TaskId,
    pub session_id: SessionId,
    pub response: Option<String>,
    pub sources: Vec<SourceDto>,
    pub quality: Option<f32>,
    pub quality_low: bool,
}

#[derive(Debug, Serialize)]
pub struct ThinkingStepDto {
    pub seq: u64,
    pub step_type: StepType,
    pub agent_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TurnDto {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub task_uid: Option<TaskId>,
    pub steps: Vec<ThinkingStepDto>,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryResponse {
    pub turns: Vec<TurnDto>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDatabaseRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryDatabaseRequest {
    pub database: String,
    pub query: String,
    #[serde(default = "default_n_results")]
    pub n_results: usize,
}

fn default_n_results() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct SmartInsertRequest {
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub auto_create: bool,
}

#[derive(Debug, Serialize)]
pub struct SmartInsertResponse {
    pub database: String,
    pub inserted_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SuggestTargetRequest {
    pub content: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct SuggestTargetResponse {
    pub database: Option<String>,
    pub confidence: f32,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct InterruptRequest {
    pub task_uid: Option<TaskId>,
}

#[derive(Debug, Deserialize)]
pub struct SetPreferenceRequest {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RateEpisodeRequest {
    pub rating: u8,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub success: bool,
    pub role: Option<String>,
    pub username: String,
    pub token: Option<String>,
}
