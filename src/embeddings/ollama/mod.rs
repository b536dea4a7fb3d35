
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::OllamaConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking client for the Ollama embedding and generation APIs.
///
/// The same embedding model is used for document chunks and for queries;
/// mixing models would make similarity scores meaningless.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embed_model: String,
    generate_model: String,
    batch_size: u32,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embed_model: config.embed_model.clone(),
            generate_model: config.generate_model.clone(),
            batch_size: config.batch_size,
            api_key: config.api_key.clone(),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Test connection to the Ollama server and verify both configured
    /// models are available.
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_models().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} (embed: {}, generate: {})",
            self.base_url, self.embed_model, self.generate_model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive.
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            let mut request = self.agent.get(url.as_str());
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", &format!("Bearer {}", key));
            }
            request
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// Validate that the configured embedding and generation models exist.
    #[inline]
    pub fn validate_models(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;
        let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();

        for wanted in [&self.embed_model, &self.generate_model] {
            if !available.contains(&wanted.as_str()) {
                warn!(
                    "Model {} not found. Available models: {:?}",
                    wanted, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    wanted,
                    available
                ));
            }
        }

        debug!("Models {} and {} are available", self.embed_model, self.generate_model);
        Ok(())
    }

    /// List all models known to the server.
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = self
            .make_request_with_retry(|| {
                let mut request = self.agent.get(url.as_str());
                if let Some(key) = &self.api_key {
                    request = request.header("Authorization", &format!("Bearer {}", key));
                }
                request
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate an embedding vector for a single text.
    #[inline]
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_single_batch(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))
    }

    /// Generate embedding vectors for multiple texts, splitting the work
    /// into server-friendly batches.
    #[inline]
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let vectors = self
                .embed_single_batch(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            results.extend(vectors);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    /// Generate a completion for `prompt` with the configured model.
    #[inline]
    pub fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        debug!(
            "Requesting generation (prompt length: {}, temperature: {})",
            prompt.len(),
            temperature
        );

        let request = GenerateRequest {
            model: self.generate_model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: GenerateOptions { temperature },
        };

        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generation URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize generation request")?;

        let response_text = self
            .make_request_with_retry(|| {
                let mut request = self
                    .agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json");
                if let Some(key) = &self.api_key {
                    request = request.header("Authorization", &format!("Bearer {}", key));
                }
                request
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate completion")?;

        let generate_response: GenerateResponse =
            serde_json::from_str(&response_text).context("Failed to parse generation response")?;

        debug!(
            "Generation returned {} characters",
            generate_response.response.len()
        );
        Ok(generate_response.response)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: self.embed_model.clone(),
            input: texts.to_vec(),
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                let mut request = self
                    .agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json");
                if let Some(key) = &self.api_key {
                    request = request.header("Authorization", &format!("Bearer {}", key));
                }
                request
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if embed_response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                embed_response.embeddings.len()
            ));
        }

        Ok(embed_response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}
