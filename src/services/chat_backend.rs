//! Generation backend speaking a chat-completions style image API
//!
//! This vendor returns the generated image in the same response as the
//! request, so the uniform submit/poll shape is adapted by stashing the
//! completed result under a synthetic task id: submit performs the whole
//! generation, the first poll reports success.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::BackendError;
use crate::models::{TaskPoll, TaskSpec};
use crate::services::download_to;
use crate::traits::GenerationBackend;

pub struct ChatApiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    completed: Mutex<HashMap<String, Vec<String>>>,
}

impl ChatApiBackend {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            completed: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl GenerationBackend for ChatApiBackend {
    async fn submit(&self, spec: &TaskSpec) -> Result<String, BackendError> {
        let mut content = vec![json!({ "type": "text", "text": spec.prompt })];
        for url in &spec.input_urls {
            content.push(json!({ "type": "image_url", "image_url": { "url": url } }));
        }
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "modalities": ["image", "text"],
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
        let urls = parse_image_urls(&body);
        if urls.is_empty() {
            return Err(BackendError::InvalidResponse(
                "chat response carried no images".to_string(),
            ));
        }

        let task_id = Uuid::new_v4().to_string();
        let mut completed = self.completed.lock().await;
        completed.insert(task_id.clone(), urls);
        Ok(task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<TaskPoll, BackendError> {
        let mut completed = self.completed.lock().await;
        match completed.remove(task_id) {
            Some(result_urls) => Ok(TaskPoll::Success { result_urls }),
            None => Err(BackendError::InvalidResponse(format!(
                "unknown task id {}",
                task_id
            ))),
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), BackendError> {
        download_to(&self.client, url, dest).await
    }
}

fn parse_image_urls(body: &Value) -> Vec<String> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("images"))
        .and_then(|images| images.as_array())
        .map(|images| {
            images
                .iter()
                .filter_map(|image| {
                    image
                        .get("image_url")
                        .and_then(|u| u.get("url"))
                        .and_then(|u| u.as_str())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_image_urls_from_chat_response() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "here you go",
                    "images": [
                        { "image_url": { "url": "https://cdn.test/out.png" } }
                    ]
                }
            }]
        });
        assert_eq!(parse_image_urls(&body), vec!["https://cdn.test/out.png"]);
        assert!(parse_image_urls(&json!({"choices": []})).is_empty());
    }
}
