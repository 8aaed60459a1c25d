use crate::conversation::Role;
use serde::Serialize;

// Re-export AppError for convenience
pub use crate::error::AppError;

/// What a generation request is for. Drives temperature, response format and
/// the rate-limit bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTask {
    Sentiment,
    Insights,
    Chat,
    Classification,
    /// Minimal request sent by the health check.
    Probe,
}

impl PromptTask {
    pub fn label(&self) -> &'static str {
        match self {
            PromptTask::Sentiment => "sentiment",
            PromptTask::Insights => "insights",
            PromptTask::Chat => "chat",
            PromptTask::Classification => "classification",
            PromptTask::Probe => "probe",
        }
    }
}

/// Shape the service is asked to answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Text,
}

/// One turn of the prompt sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptTurn {
    pub role: Role,
    pub text: String,
}

impl PromptTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// A fully built request for the generative model.
///
/// Cloneable so the invoker can resend the same request on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub task: PromptTask,
    pub system_instruction: String,
    /// Conversation contents, oldest first. The last turn is always the user's.
    pub contents: Vec<PromptTurn>,
    pub temperature: f32,
    pub format: ResponseFormat,
}

impl GenerationRequest {
    /// Text of the final user turn, used by test doubles and log previews.
    pub fn last_user_text(&self) -> &str {
        self.contents
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.text.as_str())
            .unwrap_or("")
    }
}
