//! Integration tests module
//!
//! End-to-end tests for the quizline pipeline, including:
//! - Source → generation (mocked AI service) → delivery → quiz library
//! - Quota, cooldown and content failure handling

pub mod error_scenarios;
pub mod fixtures;
pub mod pipeline_test;
