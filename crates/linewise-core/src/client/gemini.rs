use super::{GenerateOptions, Generator};
use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Backend for the Gemini `generateContent` REST endpoint.
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    default_model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    /// Build a backend, reading the API key from `config.api_key_env_var`.
    ///
    /// Fails with [`Error::MissingCredentials`] when the variable is unset or blank.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let key = std::env::var(&config.api_key_env_var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::MissingCredentials(config.api_key_env_var.clone()))?;
        Self::with_api_key(config, key)
    }

    /// Build a backend with an explicit API key.
    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::build(
            &config.base_url,
            &config.default_model,
            api_key.into(),
            config.timeout(),
        )
    }

    fn build(base_url: &str, model: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("linewise/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: model.to_string(),
            api_key,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }
}

/// Request body for `generateContent`.
fn request_body(prompt: &str, options: &GenerateOptions) -> Value {
    let mut generation_config = json!({ "temperature": options.temperature });
    if let Some(mime) = &options.response_mime_type {
        generation_config["responseMimeType"] = json!(mime);
    }
    if let Some(schema) = &options.response_schema {
        generation_config["responseSchema"] = schema.clone();
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": generation_config,
    });
    if let Some(instruction) = &options.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }
    body
}

/// Concatenated text of the first candidate's parts.
fn extract_text(payload: &Value) -> String {
    payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Message from a `{"error": {"message": ...}}` envelope, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl Generator for GeminiBackend {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let url = self.endpoint(model);
        debug!("POST {url} ({} prompt chars)", prompt.chars().count());

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request_body(prompt, options))
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let payload: Value = response.json().await?;
        Ok(extract_text(&payload))
    }
}
