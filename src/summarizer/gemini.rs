//! Gemini `generateContent` backend for summaries.

use crate::error::{Result, RoundtableError};
use crate::summarizer::{GenerationRequest, SummaryGenerator};
use async_trait::async_trait;
use serde_json::{Value, json};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Calls the Gemini REST API with a JSON response schema.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiGenerator {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Points the generator at another endpoint (proxies, local fakes).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{model}:generateContent", self.base_url)
    }
}

/// Request body for `generateContent`.
pub fn request_body(request: &GenerationRequest) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": {
            "temperature": request.temperature,
            "responseMimeType": "application/json",
            "responseSchema": request.schema,
        }
    })
}

/// Pulls the JSON document out of the first candidate's text part.
pub fn extract_json(response: &Value) -> Result<Value> {
    let text = response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| RoundtableError::MalformedResponse {
            message: "response has no candidate text".to_string(),
        })?;
    serde_json::from_str(text).map_err(|e| RoundtableError::MalformedResponse {
        message: format!("candidate text is not JSON: {e}"),
    })
}

#[async_trait]
impl SummaryGenerator for GeminiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Value> {
        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(&request))
            .send()
            .await
            .map_err(|e| RoundtableError::Generation {
                message: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(RoundtableError::Generation {
                message: format!("API returned status {}", response.status()),
            });
        }

        let text = response.text().await.map_err(|e| RoundtableError::Generation {
            message: format!("failed to read response: {e}"),
        })?;
        let body: Value = serde_json::from_str(&text)?;
        extract_json(&body)
    }
}
