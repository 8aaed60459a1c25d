use crate::actors::messages::{AppError, GenerationRequest, PromptTurn, ResponseFormat};
use crate::actors::traits::GenerativeModel;
use crate::config::AppConfig;
use crate::conversation::Role;
use crate::error::FailureKind;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// HTTP client for the Gemini `generateContent` endpoint.
///
/// Only performs a single request per call. Timeouts and retries belong to
/// [`crate::actors::invoker::ResilientInvoker`].
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

// --- Wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl<'a> From<&'a PromptTurn> for Content<'a> {
    fn from(turn: &'a PromptTurn) -> Self {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        Content {
            role: Some(role),
            parts: vec![Part { text: &turn.text }],
        }
    }
}

fn build_body(request: &GenerationRequest) -> GenerateContentBody<'_> {
    GenerateContentBody {
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: &request.system_instruction,
            }],
        },
        contents: request.contents.iter().map(Content::from).collect(),
        generation_config: GenerationConfig {
            temperature: request.temperature,
            response_mime_type: match request.format {
                ResponseFormat::Json => "application/json",
                ResponseFormat::Text => "text/plain",
            },
        },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, AppError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AppError::MalformedResponse(
            "response contained no candidate text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    #[instrument(skip(self, request), fields(task = request.task.label(), model = %self.model))]
    async fn generate(&self, request: GenerationRequest) -> Result<String, AppError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::AuthConfiguration("GEMINI_API_KEY is not set".to_string())
        })?;

        let res = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&build_body(&request))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let kind = FailureKind::from_status(status.as_u16());
            warn!(status = status.as_u16(), kind = %kind, "generateContent failed");
            return Err(AppError::from_failure(
                kind,
                format!("generateContent returned {}: {}", status, body.trim()),
            ));
        }

        let body = res.text().await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&body)?;
        let text = extract_text(parsed)?;
        debug!(chars = text.len(), "generateContent succeeded");
        Ok(text)
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn name(&self) -> &str {
        &self.model
    }
}
