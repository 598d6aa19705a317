//! Gemini adapter for generative risk summaries.
//!
//! Calls the `generateContent` REST endpoint. The action passed to
//! [`Adapter::execute`] is the model name; an empty action uses the
//! configured default model.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{Adapter, AdapterOutput};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Gemini REST client
pub struct GeminiAdapter {
    api_key: String,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u64>,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Build API URL
    fn api_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}{}?key={}",
            self.endpoint, model, method, self.api_key
        )
    }

    fn model_for<'a>(&'a self, action: &'a str) -> &'a str {
        if action.trim().is_empty() {
            &self.model
        } else {
            action
        }
    }
}

/// First candidate's concatenated text parts
fn extract_text(response: &GenerateResponse) -> Option<String> {
    let content = response.candidates.first()?.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn execute(&self, action: &str, input: &str, timeout: Duration) -> Result<AdapterOutput> {
        let model = self.model_for(action);
        let url = self.api_url(model, ":generateContent");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&serde_json::json!({
                "contents": [{ "parts": [{ "text": input }] }],
            }))
            .send()
            .await
            .with_context(|| format!("Failed to call Gemini model '{}'", model))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {}: {}", status.as_u16(), body.trim());
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let content = extract_text(&parsed).context("Gemini returned no text")?;
        let mut output = AdapterOutput::new(content);
        output.tokens_used = parsed.usage_metadata.and_then(|u| u.total_token_count);
        Ok(output)
    }

    async fn health_check(&self) -> Result<()> {
        let url = self.api_url(&self.model, "");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to run Gemini health check")?;

        if !response.status().is_success() {
            anyhow::bail!("Gemini health check failed: HTTP {}", response.status().as_u16());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let adapter = GeminiAdapter::new("KEY").with_endpoint("https://example.test/v1/");
        assert_eq!(
            adapter.api_url("gemini-2.5-flash", ":generateContent"),
            "https://example.test/v1/models/gemini-2.5-flash:generateContent?key=KEY"
        );
    }

    #[test]
    fn test_empty_action_uses_default_model() {
        let adapter = GeminiAdapter::new("KEY").with_model("gemini-test");
        assert_eq!(adapter.model_for(""), "gemini-test");
        assert_eq!(adapter.model_for("other"), "other");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "High risk. " }, { "text": "CITES I." }] } }],
            "usageMetadata": { "totalTokenCount": 42 }
        }))
        .unwrap();
        assert_eq!(extract_text(&response).as_deref(), Some("High risk. CITES I."));
        assert_eq!(response.usage_metadata.unwrap().total_token_count, Some(42));
    }

    #[test]
    fn test_extract_text_empty_candidates() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(extract_text(&response).is_none());
    }
}
