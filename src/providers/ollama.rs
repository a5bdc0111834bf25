//! Ollama strategy, using the native chat endpoint (`POST {base}/api/chat`).
//!
//! The user prompt is the message body and the image parts travel as the
//! message's `images` array of bare base64 strings. The output schema is
//! passed as `format`, which Ollama uses to constrain decoding.

use super::{count_unsent_parts, read_success_body, transport_error, ExtractionStrategy};
use crate::config::{ModelConfig, Provider};
use crate::error::ExtractionError;
use crate::output::Part;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Default local server address.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Strategy for [`Provider::Ollama`].
#[derive(Debug, Clone)]
pub struct OllamaStrategy {
    client: reqwest::Client,
}

impl OllamaStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtractionStrategy for OllamaStrategy {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    async fn extract(
        &self,
        config: &ModelConfig,
        parts: &[Part],
        output_schema: &Value,
    ) -> Result<String, ExtractionError> {
        let unsent = count_unsent_parts(parts);
        if unsent > 0 {
            warn!("Ollama: {} text parts are not sent", unsent);
        }

        let base = config.base_url().unwrap_or(DEFAULT_OLLAMA_BASE_URL);
        let url = format!("{}/api/chat", base.trim_end_matches('/'));
        let body = build_request(config, parts, output_schema);
        debug!("Ollama: POST {} ({} images)", url, parts.len() - unsent);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Ollama, e))?;

        let text = read_success_body(Provider::Ollama, response).await?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ExtractionError::MalformedResponse {
                provider: Provider::Ollama.to_string(),
                detail: e.to_string(),
            })?;
        Ok(parsed
            .message
            .and_then(|m| m.content)
            .unwrap_or_default())
    }
}

/// Build the `/api/chat` request body.
pub fn build_request(config: &ModelConfig, parts: &[Part], output_schema: &Value) -> Value {
    let images: Vec<&str> = parts
        .iter()
        .filter(|p| p.is_image())
        .map(Part::content)
        .collect();
    json!({
        "model": config.model_name(),
        "messages": [
            { "role": "system", "content": config.system_prompt() },
            { "role": "user", "content": config.user_prompt(), "images": images },
        ],
        "stream": false,
        "format": output_schema,
        "options": {
            "temperature": config.temperature(),
            "top_p": config.top_p(),
        },
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}
