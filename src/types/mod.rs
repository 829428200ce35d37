//! Shared identifiers and enums used across every subsystem.

pub mod error;

pub use error::{ErrorCode, RuntimeError, RuntimeResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(SessionId);
uuid_id!(TurnId);
uuid_id!(TaskId);
uuid_id!(EpisodeId);
uuid_id!(DocumentId);

/// User identifiers are caller-supplied strings (usernames, external subject
/// ids), not generated here, so they get a thin newtype rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Entity identity is deterministic (`hash(type:lower(name):user_id)`), so it
/// is a plain newtype over the hex digest rather than a random uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Partial,
    Failure,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Thinking,
    Status,
    Progress,
    ToolCall,
    Observation,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceType {
    AgentInput,
    AgentOutput,
    LlmRequest,
    LlmResponse,
    Routing,
    Thinking,
    MemoryInjection,
    Error,
}

/// Query categories recognized by the Classifier (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SimpleChat,
    RagSearch,
    Calculation,
    Translation,
    Summarization,
    Analysis,
    Planning,
    Creative,
    MultiStep,
    ToolUse,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::SimpleChat => "simple_chat",
            Category::RagSearch => "rag_search",
            Category::Calculation => "calculation",
            Category::Translation => "translation",
            Category::Summarization => "summarization",
            Category::Analysis => "analysis",
            Category::Planning => "planning",
            Category::Creative => "creative",
            Category::MultiStep => "multi_step",
            Category::ToolUse => "tool_use",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Fast,
    Standard,
    Thorough,
    Cautious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Org,
    Location,
    Concept,
    Tool,
    Project,
    Document,
    Date,
    Custom,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Person => "person",
            EntityType::Org => "org",
            EntityType::Location => "location",
            EntityType::Concept => "concept",
            EntityType::Tool => "tool",
            EntityType::Project => "project",
            EntityType::Document => "document",
            EntityType::Date => "date",
            EntityType::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_display() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn category_display_matches_wire_format() {
        assert_eq!(Category::RagSearch.to_string(), "rag_search");
        assert_eq!(Category::MultiStep.to_string(), "multi_step");
    }

    #[test]
    fn user_id_from_str() {
        let u: UserId = "alice".into();
        assert_eq!(u.0, "alice");
    }
}
