//! Prompt templates, one per task kind.
//!
//! Each builder returns a complete [`GenerationRequest`]; the orchestrator
//! never assembles prompt text itself.

use crate::actors::messages::{AppError, GenerationRequest, PromptTask, PromptTurn, ResponseFormat};
use crate::conversation::{ConversationTurn, Role};
use crate::models::BatchAggregate;

/// Low temperature for structured extraction.
const EXTRACTION_TEMPERATURE: f32 = 0.1;
/// Higher temperature for free-form answers.
const CREATIVE_TEMPERATURE: f32 = 0.7;

const SENTIMENT_INSTRUCTION: &str = r#"You analyze viewer comments left under online videos.
Read the comment and answer with a single JSON object, with exactly these fields:
{
  "sentiment_score": <number from -1.0 (very negative) to 1.0 (very positive)>,
  "top_3_themes": [<up to 3 short topic labels>],
  "controversy_level": <integer from 1 (uncontroversial) to 10 (highly divisive)>
}
No prose, no markdown. Only the JSON object."#;

const ANALYST_INSTRUCTION: &str = r#"You are an assistant helping a video creator understand their audience.
Answer questions about viewer sentiment, engagement and content themes.
Be concise and concrete. Ask a clarifying question when the request is ambiguous."#;

const CLASSIFIER_INSTRUCTION: &str = r#"Classify the user's message into exactly one category:
sentiment_analysis - questions about viewer mood or opinion
engagement_analysis - questions about views, likes, comments, retention or growth
content_analysis - questions about topics, themes or what the video covers
general - small talk or anything else
Answer with the category name only."#;

const INSIGHTS_INSTRUCTION: &str = r#"You advise a video creator based on aggregated comment analytics.
Give 3 to 5 specific, actionable recommendations grounded in the numbers provided:
what works, what to improve, how the audience mood trends, what content to make next.
Answer as a numbered list, one recommendation per line."#;

const PROBE_TEXT: &str = "Reply with the single word: ok";

/// Sentiment extraction for one comment.
pub fn sentiment_request(comment: &str) -> GenerationRequest {
    GenerationRequest {
        task: PromptTask::Sentiment,
        system_instruction: SENTIMENT_INSTRUCTION.to_string(),
        contents: vec![PromptTurn::user(comment)],
        temperature: EXTRACTION_TEMPERATURE,
        format: ResponseFormat::Json,
    }
}

/// Recommendations derived from a batch aggregate. Only the aggregate is sent,
/// never the individual comments.
pub fn insights_request(aggregate: &BatchAggregate) -> Result<GenerationRequest, AppError> {
    let data = serde_json::to_string_pretty(aggregate)
        .map_err(|e| AppError::Internal(format!("Failed to encode aggregate: {}", e)))?;
    let prompt = format!(
        "Comment analytics for the video:\n{}\n\nProvide 3-5 actionable insights for the creator.",
        data
    );

    Ok(GenerationRequest {
        task: PromptTask::Insights,
        system_instruction: INSIGHTS_INSTRUCTION.to_string(),
        contents: vec![PromptTurn::user(prompt)],
        temperature: CREATIVE_TEMPERATURE,
        format: ResponseFormat::Text,
    })
}

/// Chat reply given the session history (oldest first) and the new message.
pub fn chat_request(history: &[ConversationTurn], message: &str) -> GenerationRequest {
    let mut contents: Vec<PromptTurn> = history
        .iter()
        .map(|turn| match turn.role {
            Role::User => PromptTurn::user(turn.text.clone()),
            Role::Assistant => PromptTurn::assistant(turn.text.clone()),
        })
        .collect();
    contents.push(PromptTurn::user(message));

    GenerationRequest {
        task: PromptTask::Chat,
        system_instruction: ANALYST_INSTRUCTION.to_string(),
        contents,
        temperature: CREATIVE_TEMPERATURE,
        format: ResponseFormat::Text,
    }
}

pub fn classification_request(query: &str) -> GenerationRequest {
    GenerationRequest {
        task: PromptTask::Classification,
        system_instruction: CLASSIFIER_INSTRUCTION.to_string(),
        contents: vec![PromptTurn::user(query)],
        temperature: EXTRACTION_TEMPERATURE,
        format: ResponseFormat::Text,
    }
}

/// Smallest possible request, used by the health check.
pub fn probe_request() -> GenerationRequest {
    GenerationRequest {
        task: PromptTask::Probe,
        system_instruction: "You are a health probe.".to_string(),
        contents: vec![PromptTurn::user(PROBE_TEXT)],
        temperature: 0.0,
        format: ResponseFormat::Text,
    }
}
