//! OpenAI strategy, using the Responses API (`POST {base}/responses`).
//!
//! The request carries one system message and one user message. The user
//! message is the user prompt as `input_text` followed by one `input_image`
//! per image part, in page order, each as a `data:image/png;base64,` URL.
//! The output schema goes into `text.format` as a `json_schema` constraint.

use super::{count_unsent_parts, read_success_body, transport_error, ExtractionStrategy};
use crate::config::{ModelConfig, Provider};
use crate::error::ExtractionError;
use crate::output::Part;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Default API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Schema name used when the schema has no usable `title`.
const DEFAULT_SCHEMA_NAME: &str = "extracted_data";

/// Strategy for [`Provider::OpenAi`].
#[derive(Debug, Clone)]
pub struct OpenAiStrategy {
    client: reqwest::Client,
}

impl OpenAiStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtractionStrategy for OpenAiStrategy {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn extract(
        &self,
        config: &ModelConfig,
        parts: &[Part],
        output_schema: &Value,
    ) -> Result<String, ExtractionError> {
        let unsent = count_unsent_parts(parts);
        if unsent > 0 {
            warn!("OpenAI: {} text parts are not sent", unsent);
        }

        let base = config.base_url().unwrap_or(DEFAULT_OPENAI_BASE_URL);
        let url = format!("{}/responses", base.trim_end_matches('/'));
        let body = build_request(config, parts, output_schema);
        debug!("OpenAI: POST {} ({} parts)", url, parts.len() - unsent);

        let response = self
            .client
            .post(&url)
            .bearer_auth(config.api_key())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        let text = read_success_body(Provider::OpenAi, response).await?;
        let parsed: ResponsesBody =
            serde_json::from_str(&text).map_err(|e| ExtractionError::MalformedResponse {
                provider: Provider::OpenAi.to_string(),
                detail: e.to_string(),
            })?;
        Ok(parsed.output_text())
    }
}

/// Build the Responses API request body.
pub fn build_request(config: &ModelConfig, parts: &[Part], output_schema: &Value) -> Value {
    json!({
        "model": config.model_name(),
        "input": [
            { "role": "system", "content": config.system_prompt() },
            { "role": "user", "content": user_content(config.user_prompt(), parts) },
        ],
        "temperature": config.temperature(),
        "top_p": config.top_p(),
        "text": {
            "format": {
                "type": "json_schema",
                "name": schema_name(output_schema),
                "schema": output_schema,
            }
        },
    })
}

/// The prompt text followed by one image slot per image part.
fn user_content(user_prompt: &str, parts: &[Part]) -> Vec<Value> {
    std::iter::once(json!({ "type": "input_text", "text": user_prompt }))
        .chain(parts.iter().filter(|p| p.is_image()).map(|p| {
            json!({
                "type": "input_image",
                "image_url": format!("data:{};base64,{}", p.image_mime_type(), p.content()),
            })
        }))
        .collect()
}

/// The schema's `title`, reduced to the characters OpenAI accepts in a
/// format name.
fn schema_name(schema: &Value) -> String {
    let name: String = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    if name.trim_matches('_').is_empty() {
        DEFAULT_SCHEMA_NAME.to_string()
    } else {
        name
    }
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesBody {
    /// Concatenated `output_text` content, `""` when there is none.
    fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text.as_deref())
            .collect()
    }
}
