//! commentlens core: cached, resilient comment analysis on top of a
//! generative-language service.

pub mod actors;
pub mod brain;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod error;
pub mod health;
pub mod models;
pub mod rate_limiter;
pub mod telemetry;

pub use actors::{AnalysisOrchestrator, GeminiClient, GenerativeModel};
pub use config::AppConfig;
pub use error::{AppError, FailureKind};

#[cfg(test)]
mod tests;
