pub mod embedding;
pub mod gemini;
pub mod local;

use crate::errors::PipelineError;
use async_trait::async_trait;
use dyn_clone::DynClone;
pub use embedding::{generate_embedding, ApiEmbedder, Embedder};
use std::fmt::Debug;

/// A trait for interacting with an AI provider.
///
/// This trait defines a common interface for prompting different Large
/// Language Models (e.g., Gemini, local OpenAI-compatible models).
#[async_trait]
pub trait AiProvider: Send + Sync + Debug + DynClone {
    /// Generates a response from a given system and user prompt.
    ///
    /// The result should be a string containing the AI's response.
    async fn generate(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, PipelineError>;
}

dyn_clone::clone_trait_object!(AiProvider);
