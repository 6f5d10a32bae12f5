//! Marketing copy generator backed by a chat-completions text API

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::BackendError;
use crate::models::{ProductInfo, TextResult};
use crate::traits::TextGenerator;

pub struct ChatTextGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_retries: u32,
}

impl ChatTextGenerator {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        temperature: f64,
        max_retries: u32,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            max_retries,
        })
    }

    fn build_prompt(product: &ProductInfo) -> String {
        format!(
            "Write social marketing copy for this product and answer with a single JSON \
             object {{\"title\": ..., \"content\": ...}} and nothing else.\n\
             Product: {}\nBrand: {}\nStyle: {}\nFeatures: {}\nAudience: {}",
            product.product_name,
            product.brand,
            product.style,
            product.features,
            product.target_audience
        )
    }

    async fn request_once(&self, prompt: &str) -> Result<TextResult, BackendError> {
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let body: Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| {
                BackendError::InvalidResponse("chat response carried no content".to_string())
            })?;

        let parsed = extract_json(content).ok_or_else(|| {
            BackendError::InvalidResponse(format!(
                "copy response is not the expected JSON: {}",
                content.chars().take(200).collect::<String>()
            ))
        })?;
        match (
            parsed.get("title").and_then(|t| t.as_str()),
            parsed.get("content").and_then(|c| c.as_str()),
        ) {
            (Some(title), Some(content)) => Ok(TextResult {
                title: title.to_string(),
                content: content.to_string(),
                success: true,
                error: None,
            }),
            _ => Err(BackendError::InvalidResponse(
                "copy JSON missing title or content".to_string(),
            )),
        }
    }
}

#[async_trait]
impl TextGenerator for ChatTextGenerator {
    async fn generate(&self, product_info: &ProductInfo) -> Result<TextResult, BackendError> {
        let prompt = Self::build_prompt(product_info);
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match self.request_once(&prompt).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    tracing::warn!(
                        "copy attempt {}/{} failed: {}",
                        attempt + 1,
                        self.max_retries,
                        error
                    );
                    last_error = Some(error);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(2 * (attempt as u64 + 1))).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            BackendError::InvalidResponse("copy generation produced no attempts".to_string())
        }))
    }
}

/// Models rarely return bare JSON; tolerate fenced code blocks and
/// surrounding prose by also trying the outermost brace span.
fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(value);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        serde_json::from_str(&text[start..=end]).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let parsed = extract_json(r#"{"title": "t", "content": "c"}"#).unwrap();
        assert_eq!(parsed["title"], "t");
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n{\"title\": \"t\", \"content\": \"c\"}\n```";
        let parsed = extract_json(text).unwrap();
        assert_eq!(parsed["content"], "c");
    }

    #[test]
    fn extracts_json_inside_prose() {
        let text = "Sure! {\"title\": \"t\", \"content\": \"c\"} Hope that helps.";
        let parsed = extract_json(text).unwrap();
        assert_eq!(parsed["title"], "t");
    }

    #[test]
    fn rejects_text_without_json() {
        assert!(extract_json("no structured data here").is_none());
    }
}
