//! Integration tests entry point
//!
//! This file serves as the entry point for the end-to-end suite.
//! It includes the integration_tests module which contains:
//! - Immediate delivery pipeline tests
//! - Error scenario tests

mod common;
mod integration_tests;
