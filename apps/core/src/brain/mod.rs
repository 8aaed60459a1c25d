//! # Brain Module
//!
//! Everything that knows what the model is asked and how its answers look.
//!
//! ## Components
//! - `prompts`: one template per task kind
//! - `parser`: strict decoding of answers
//! - `classifier`: query categorization (regex fast path, model fallback)

pub mod classifier;
pub mod parser;
pub mod prompts;

pub use classifier::{CategoryMatch, QueryCategory, QueryClassifier};
