use crate::actors::messages::{AppError, GenerationRequest};
use async_trait::async_trait;

/// Defines the public interface for a generative language model.
///
/// This trait abstracts the concrete backend, so the orchestrator can run
/// against the remote service in production and against scripted doubles in tests.
#[async_trait]
pub trait GenerativeModel: Send + Sync + 'static {
    /// Sends one request and returns the raw text of the model's answer.
    ///
    /// Failures are already classified through [`AppError::kind`]; the caller
    /// decides whether to retry.
    async fn generate(&self, request: GenerationRequest) -> Result<String, AppError>;

    /// Whether the backend has what it needs (credential, endpoint) to be called at all.
    fn is_configured(&self) -> bool {
        true
    }

    /// Short name used in logs and the health report.
    fn name(&self) -> &str;
}
