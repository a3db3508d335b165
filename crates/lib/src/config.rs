//! # Pipeline Configuration
//!
//! Typed configuration for the pipeline components. Every knob has a sensible
//! default so an empty config section deserializes to a working setup; binaries
//! layer file and environment overrides on top of these structs.

use serde::Deserialize;

/// Retry behavior for query execution against the storage backend.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts for a retryable failure, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles (times `backoff_factor`) after each attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_backoff_factor() -> u32 {
    2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Tuning for schema retrieval.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Maximum number of tables returned by a retrieval.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Cosine similarity floor below which a table is not considered relevant.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
    /// Confidence reported when retrieval degrades to keyword matching.
    #[serde(default = "default_keyword_confidence")]
    pub keyword_confidence: f32,
    /// Confidence reported when retrieval degrades to the complete schema.
    #[serde(default = "default_complete_confidence")]
    pub complete_confidence: f32,
}

fn default_top_k() -> usize {
    5
}
fn default_similarity_floor() -> f32 {
    0.2
}
fn default_keyword_confidence() -> f32 {
    0.6
}
fn default_complete_confidence() -> f32 {
    0.5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_floor: default_similarity_floor(),
            keyword_confidence: default_keyword_confidence(),
            complete_confidence: default_complete_confidence(),
        }
    }
}

/// SQL generation tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    /// Upper bound on LLM generation attempts per turn, counting the first
    /// attempt and every error-feedback regeneration.
    #[serde(default = "default_max_generation_attempts")]
    pub max_generation_attempts: u32,
}

fn default_max_generation_attempts() -> u32 {
    3
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_generation_attempts: default_max_generation_attempts(),
        }
    }
}

/// Result formatting policy.
#[derive(Debug, Deserialize, Clone)]
pub struct FormatterConfig {
    /// Maximum rows rendered into a chat message; the rest are summarized as a count.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// A provider with at most this many conflicting appointments is reported
    /// as "Partially Available"; zero conflicts is "Fully Available", more is "Busy".
    #[serde(default = "default_partially_available_max")]
    pub partially_available_max: i64,
}

fn default_max_rows() -> usize {
    5
}
fn default_partially_available_max() -> i64 {
    2
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            partially_available_max: default_partially_available_max(),
        }
    }
}

/// Aggregate configuration consumed by `ChatPipelineBuilder`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub formatter: FormatterConfig,
}

/// A reusable configuration for a specific AI provider instance.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// The type of provider (e.g., "gemini", "local").
    pub provider: String,
    /// The API URL. Optional for providers like Gemini where it can be derived.
    pub api_url: Option<String>,
    /// The API key, which can be null for local providers.
    pub api_key: Option<String>,
    pub model_name: String,
}

/// Configuration for the embedding model provider.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub model_name: String,
    pub api_key: Option<String>,
}
