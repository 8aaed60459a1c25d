//! # Actors
//!
//! The runtime pieces that talk to the generative model.
//!
//! ## Components
//! - `traits`: the `GenerativeModel` seam
//! - `messages`: request types shared by every backend
//! - `gemini`: HTTP backend
//! - `invoker`: timeout, retry and backoff around a backend
//! - `orchestrator`: the facade callers use

pub mod gemini;
pub mod invoker;
pub mod messages;
pub mod orchestrator;
pub mod traits;

pub use gemini::GeminiClient;
pub use invoker::{Budget, InvocationOutcome, ResilientInvoker, RetryPolicy};
pub use orchestrator::{AnalysisOrchestrator, CacheStatsReport};
pub use traits::GenerativeModel;
