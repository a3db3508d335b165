//! # Prompt Template Modules
//!
//! This module organizes the prompt templates used throughout the `carerag`
//! library: SQL generation, SQL repair after an execution failure, and intent
//! classification.

pub mod core;
