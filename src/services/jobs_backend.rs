//! Generation backend speaking an async jobs HTTP API
//!
//! Create-task returns a task id; the executor polls record-info until the
//! job settles, then downloads the result asset. The vendor wraps every
//! response in a `{code, message, data}` envelope; non-200 envelope codes map
//! onto the HTTP status taxonomy so the retry policy can classify them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::error::BackendError;
use crate::models::{TaskPoll, TaskSpec};
use crate::services::download_to;
use crate::traits::GenerationBackend;

/// Envelope failure signals that mean "try again" rather than "give up".
const TRANSIENT_FAIL_CODES: [&str; 3] = ["internal_error", "timeout", "capacity"];

pub struct JobsApiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl JobsApiBackend {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, BackendError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| BackendError::InvalidResponse(format!("invalid api key: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    async fn envelope(&self, response: reqwest::Response) -> Result<Value, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }
        let body: Value = response.json().await?;
        let code = body.get("code").and_then(|c| c.as_u64()).unwrap_or(0);
        if code != 200 {
            let message = body
                .get("message")
                .or_else(|| body.get("msg"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown envelope error")
                .to_string();
            return Err(BackendError::Status {
                status: code as u16,
                message,
            });
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl GenerationBackend for JobsApiBackend {
    async fn submit(&self, spec: &TaskSpec) -> Result<String, BackendError> {
        let url = format!("{}/jobs/createTask", self.base_url);
        let payload = json!({
            "model": self.model,
            "input": {
                "prompt": spec.prompt,
                "image_urls": spec.input_urls,
                "aspect_ratio": spec.aspect_ratio,
                "resolution": spec.resolution,
                "output_format": spec.output_format,
            },
        });
        tracing::debug!(
            "creating task: prompt length {}, {} input images",
            spec.prompt.len(),
            spec.input_urls.len()
        );

        let response = self.client.post(&url).json(&payload).send().await?;
        let data = self.envelope(response).await?;
        data.get("taskId")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                BackendError::InvalidResponse("create-task response missing taskId".to_string())
            })
    }

    async fn poll(&self, task_id: &str) -> Result<TaskPoll, BackendError> {
        let url = format!("{}/jobs/recordInfo", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("taskId", task_id)])
            .send()
            .await?;
        let data = self.envelope(response).await?;

        let state = data.get("state").and_then(|s| s.as_str()).unwrap_or("");
        match state {
            "waiting" | "queuing" | "generating" => Ok(TaskPoll::Pending),
            "success" => {
                let urls = parse_result_urls(&data);
                if urls.is_empty() {
                    Err(BackendError::InvalidResponse(format!(
                        "task {} succeeded without result URLs",
                        task_id
                    )))
                } else {
                    Ok(TaskPoll::Success { result_urls: urls })
                }
            }
            "fail" => {
                let fail_code = data.get("failCode").and_then(|c| c.as_str()).unwrap_or("");
                let message = data
                    .get("failMsg")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown failure")
                    .to_string();
                let retryable = TRANSIENT_FAIL_CODES.contains(&fail_code)
                    || message.to_lowercase().contains("try again");
                Ok(TaskPoll::Failed { message, retryable })
            }
            other => Err(BackendError::InvalidResponse(format!(
                "unknown task state {:?} for {}",
                other, task_id
            ))),
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), BackendError> {
        download_to(&self.client, url, dest).await
    }
}

/// The result payload arrives either inline or as a JSON string; both carry
/// `resultUrls` as strings or `{resultUrl}` objects.
fn parse_result_urls(data: &Value) -> Vec<String> {
    let result = match data.get("resultJson") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).unwrap_or(Value::Null),
        Some(value) => value.clone(),
        None => Value::Null,
    };

    let mut urls = Vec::new();
    if let Some(items) = result.get("resultUrls").and_then(|u| u.as_array()) {
        for item in items {
            match item {
                Value::String(url) => urls.push(url.clone()),
                Value::Object(_) => {
                    if let Some(url) = item.get("resultUrl").and_then(|u| u.as_str()) {
                        urls.push(url.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_and_stringified_result_urls() {
        let inline = json!({
            "resultJson": { "resultUrls": ["https://cdn.test/1.png"] }
        });
        assert_eq!(parse_result_urls(&inline), vec!["https://cdn.test/1.png"]);

        let stringified = json!({
            "resultJson": "{\"resultUrls\":[{\"resultUrl\":\"https://cdn.test/2.png\"}]}"
        });
        assert_eq!(parse_result_urls(&stringified), vec!["https://cdn.test/2.png"]);

        assert!(parse_result_urls(&json!({})).is_empty());
    }
}
