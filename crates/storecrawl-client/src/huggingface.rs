//! Hugging Face Inference embeddings client.
//!
//! Calls the hosted feature-extraction pipeline. The default model is
//! `sentence-transformers/all-MiniLM-L6-v2`, producing 384-dimensional
//! sentence vectors.
//!
//! # Examples
//!
//! ```no_run
//! use storecrawl_client::HuggingFaceClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HuggingFaceClient::new("hf_your_token")?;
//! let vectors = client.get_embeddings_batch(&["Linen shirt", "Wool hat"]).await?;
//! println!("Embedding dimension: {}", vectors[0].len()); // 384
//! # Ok(())
//! # }
//! ```

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storecrawl_core::HttpConfig;
use storecrawl_core::error::AppError;

/// Default sentence-embedding model.
pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

const DEFAULT_ENDPOINT: &str = "https://router.huggingface.co/hf-inference/models";

/// Known models and their output dimensions.
pub fn model_dimension(model: &str) -> usize {
    match model {
        "sentence-transformers/all-MiniLM-L6-v2" => 384,
        "sentence-transformers/all-MiniLM-L12-v2" => 384,
        "sentence-transformers/all-mpnet-base-v2" => 768,
        "BAAI/bge-small-en-v1.5" => 384,
        "BAAI/bge-base-en-v1.5" => 768,
        _ => 384,
    }
}

/// HTTP client for the Hugging Face feature-extraction pipeline.
#[derive(Clone)]
pub struct HuggingFaceClient {
    client: Client,
    token: String,
    model: String,
    endpoint: String,
    dim: usize,
    timeout_secs: u64,
}

/// Request body for the feature-extraction pipeline
#[derive(Serialize)]
struct FeatureExtractionRequest<'a> {
    inputs: &'a [&'a str],
}

/// Error response from the Inference API
#[derive(Deserialize)]
struct HuggingFaceError {
    error: String,
}

impl HuggingFaceClient {
    /// Creates a client for the default model.
    pub fn new(token: &str) -> Result<Self, AppError> {
        Self::with_model(token, DEFAULT_MODEL)
    }

    /// Creates a client for a specific model.
    ///
    /// # Arguments
    ///
    /// * `token` - Hugging Face access token (`HF_TOKEN`)
    /// * `model` - Model id, e.g. `sentence-transformers/all-MiniLM-L6-v2`
    pub fn with_model(token: &str, model: &str) -> Result<Self, AppError> {
        Self::with_config(token, model, None)
    }

    /// Creates a client with full configuration.
    ///
    /// # Arguments
    ///
    /// * `token` - Hugging Face access token
    /// * `model` - Model id
    /// * `endpoint` - Base URL of a self-hosted or proxied inference endpoint
    pub fn with_config(
        token: &str,
        model: &str,
        endpoint: Option<&str>,
    ) -> Result<Self, AppError> {
        if token.trim().is_empty() {
            return Err(AppError::ConfigError("HF_TOKEN is empty".to_string()));
        }

        let http_config = HttpConfig::default();
        let client = Client::builder()
            .timeout(http_config.timeout * 4)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        let endpoint = format!(
            "{}/{}/pipeline/feature-extraction",
            endpoint.unwrap_or(DEFAULT_ENDPOINT).trim_end_matches('/'),
            model
        );

        Ok(Self {
            client,
            token: token.to_string(),
            model: model.to_string(),
            endpoint,
            dim: model_dimension(model),
            timeout_secs: (http_config.timeout * 4).as_secs(),
        })
    }

    /// Returns the model being used.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generates one embedding per text in a single API call.
    ///
    /// # Returns
    ///
    /// A vector of embedding vectors, one per input text, in the same order.
    pub async fn get_embeddings_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&FeatureExtractionRequest { inputs: texts })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Cannot connect to Hugging Face: {}", e))
                } else {
                    AppError::ClientError(e.to_string())
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = response.text().await.unwrap_or_default();

            let message = match serde_json::from_str::<HuggingFaceError>(&error_text) {
                Ok(hf_error) => hf_error.error,
                Err(_) => format!("HTTP {}: {}", status_code, error_text),
            };

            return match status_code {
                401 | 403 => Err(AppError::ClientError(format!(
                    "Hugging Face authentication failed: {}. Check your HF_TOKEN.",
                    message
                ))),
                429 => Err(AppError::RateLimitExceeded),
                _ => Err(AppError::ClientError(format!(
                    "Hugging Face error: {}",
                    message
                ))),
            };
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::InvalidPayload(format!("Failed to parse Hugging Face response: {}", e))
        })?;

        parse_embeddings(body)
    }
}

/// Decodes a feature-extraction response.
///
/// Sentence-transformer models return one pooled vector per input. Plain
/// encoder models return one vector per token instead; those are mean-pooled.
pub fn parse_embeddings(body: Value) -> Result<Vec<Vec<f32>>, AppError> {
    let Value::Array(items) = body else {
        return Err(AppError::InvalidPayload(
            "expected a JSON array of embeddings".to_string(),
        ));
    };

    items.iter().map(parse_one).collect()
}

fn parse_one(item: &Value) -> Result<Vec<f32>, AppError> {
    let rows = item
        .as_array()
        .ok_or_else(|| AppError::InvalidPayload("embedding is not an array".to_string()))?;

    if rows.iter().all(Value::is_number) {
        return Ok(rows
            .iter()
            .filter_map(Value::as_f64)
            .map(|x| x as f32)
            .collect());
    }

    let tokens: Vec<Vec<f32>> = rows
        .iter()
        .map(parse_one)
        .collect::<Result<_, _>>()?;
    let Some(width) = tokens.first().map(Vec::len) else {
        return Ok(Vec::new());
    };

    let mut pooled = vec![0.0f32; width];
    for token in &tokens {
        for (acc, x) in pooled.iter_mut().zip(token) {
            *acc += x;
        }
    }
    let n = tokens.len() as f32;
    pooled.iter_mut().for_each(|x| *x /= n);
    Ok(pooled)
}

// =============================================================================
// Trait Implementation: EmbeddingProvider
// =============================================================================

impl storecrawl_core::traits::EmbeddingProvider for HuggingFaceClient {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        self.get_embeddings_batch(&text_refs).await
    }
}
