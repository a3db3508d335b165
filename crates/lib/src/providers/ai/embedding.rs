//! # Embeddings Provider
//!
//! This module provides functionality for generating vector embeddings by
//! calling an external Gemini or OpenAI-compatible embeddings API, and the
//! [`Embedder`] trait the schema index consumes so the backend stays
//! injectable (and mockable in tests).

use crate::config::EmbeddingConfig;
use crate::errors::PipelineError;
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize, Debug)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

// --- Gemini-specific request and response structures ---

#[derive(Serialize, Debug)]
struct GeminiEmbeddingRequest<'a> {
    model: String,
    content: GeminiEmbeddingContent<'a>,
}

#[derive(Serialize, Debug)]
struct GeminiEmbeddingContent<'a> {
    parts: Vec<GeminiEmbeddingPart<'a>>,
}

#[derive(Serialize, Debug)]
struct GeminiEmbeddingPart<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct GeminiEmbeddingResponse {
    embedding: GeminiEmbeddingValue,
}

#[derive(Deserialize, Debug)]
struct GeminiEmbeddingValue {
    values: Vec<f32>,
}

/// An injectable embedding backend: text in, fixed-length vector out.
#[async_trait]
pub trait Embedder: Send + Sync + Debug {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, PipelineError>;
}

/// An [`Embedder`] backed by an external embeddings API.
#[derive(Debug, Clone)]
pub struct ApiEmbedder {
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl ApiEmbedder {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            model: model.into(),
            api_key,
        }
    }
}

impl From<EmbeddingConfig> for ApiEmbedder {
    fn from(config: EmbeddingConfig) -> Self {
        Self {
            api_url: config.api_url,
            model: config.model_name,
            api_key: config.api_key,
        }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, PipelineError> {
        generate_embedding(&self.api_url, &self.model, input, self.api_key.as_deref()).await
    }
}

/// Generates a vector embedding for a given text input using an external API.
///
/// This function dynamically constructs the correct JSON payload based on
/// whether the `api_url` is for a Gemini or an OpenAI-compatible endpoint.
pub async fn generate_embedding(
    api_url: &str,
    model: &str,
    input: &str,
    api_key: Option<&str>,
) -> Result<Vec<f32>, PipelineError> {
    let client = ReqwestClient::new();
    let mut request_builder = client.post(api_url);
    let is_gemini = api_url.contains("generativelanguage.googleapis.com");

    // --- 1. Construct the appropriate request body and apply auth ---
    if is_gemini {
        // Gemini requires the model name to be prefixed with "models/" in the payload.
        let gemini_model_name = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };

        let request_body = GeminiEmbeddingRequest {
            model: gemini_model_name,
            content: GeminiEmbeddingContent {
                parts: vec![GeminiEmbeddingPart { text: input }],
            },
        };
        debug!(payload = ?request_body, "--> Sending request to Gemini Embeddings API");
        request_builder = request_builder.json(&request_body);
        if let Some(key) = api_key {
            // Gemini uses an `x-goog-api-key` header for embeddings, not a query param.
            request_builder = request_builder.header("x-goog-api-key", key);
        }
    } else {
        let request_body = OpenAIEmbeddingRequest { model, input };
        debug!(payload = ?request_body, "--> Sending request to OpenAI-compatible Embeddings API");
        request_builder = request_builder.json(&request_body);
        if let Some(key) = api_key {
            request_builder = request_builder.bearer_auth(key);
        }
    }

    // --- 2. Send the request and handle the response ---
    let response = request_builder
        .send()
        .await
        .map_err(PipelineError::AiRequest)?;

    if !response.status().is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(PipelineError::AiApi(error_text));
    }

    if is_gemini {
        let gemini_response: GeminiEmbeddingResponse = response
            .json()
            .await
            .map_err(PipelineError::AiDeserialization)?;
        Ok(gemini_response.embedding.values)
    } else {
        let openai_response: OpenAIEmbeddingResponse = response
            .json()
            .await
            .map_err(PipelineError::AiDeserialization)?;

        openai_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                PipelineError::AiApi("OpenAI-compatible API returned no embeddings".to_string())
            })
    }
}
