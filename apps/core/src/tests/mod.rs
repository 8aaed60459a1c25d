//! Test Module
//!
//! Cross-module tests for the analysis brain. Unit tests live next to
//! their modules.
//!
//! ## Test Categories
//! - `mocks`: scripted `GenerativeModel` doubles
//! - `invoker_tests`: retry, backoff, timeout and throttling behavior
//! - `classifier_tests`: local and fallback classification
//! - `orchestrator_tests`: caching, batching, chat and health end to end


mod orchestrator_tests;
