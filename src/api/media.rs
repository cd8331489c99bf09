use crate::error::{GeneratorError, GeneratorResult};
use crate::rate_limit::RateLimiter;
use crate::scene::files;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const IMAGE_ENDPOINT: &str = "services/aigc/text2image/image-synthesis";
const VIDEO_ENDPOINT: &str = "services/aigc/video-generation/video-synthesis";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn endpoint(self) -> &'static str {
        match self {
            MediaKind::Image => IMAGE_ENDPOINT,
            MediaKind::Video => VIDEO_ENDPOINT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Client for asynchronous image/video synthesis tasks: submit, poll until
/// the task settles, then download the result.
#[derive(Debug, Clone)]
pub struct MediaClient {
    kind: MediaKind,
    model: String,
    reference_model: Option<String>,
    api_key: String,
    base_url: String,
    client: Client,
    limiter: Arc<RateLimiter>,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    output: SubmitOutput,
}

#[derive(Debug, Deserialize)]
struct SubmitOutput {
    task_id: String,
    task_status: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    output: TaskOutput,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    task_status: String,
    results: Option<Vec<TaskResult>>,
    video_url: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    url: Option<String>,
}

impl MediaClient {
    pub fn new(
        kind: MediaKind,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> GeneratorResult<Self> {
        let (poll_interval, max_polls) = match kind {
            MediaKind::Image => (Duration::from_secs(5), 60),
            // Video tasks routinely take several minutes.
            MediaKind::Video => (Duration::from_secs(15), 80),
        };

        Ok(Self {
            kind,
            model: model.into(),
            reference_model: None,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: super::http_client()?,
            limiter,
            poll_interval,
            max_polls,
        })
    }

    /// Model to switch to when a reference image is supplied (e.g. an
    /// image-to-video variant).
    pub fn with_reference_model(mut self, model: Option<String>) -> Self {
        self.reference_model = model;
        self
    }

    /// Generates one asset for `prompt` and saves it to `output_path`.
    /// `reference_image` is sent inline as a data URI when given.
    pub async fn generate(
        &self,
        prompt: &str,
        reference_image: Option<&Path>,
        output_path: &Path,
    ) -> GeneratorResult<PathBuf> {
        self.limiter.acquire().await?;
        info!("Generating {} for prompt: {}", self.kind.label(), prompt);

        let mut input = json!({ "prompt": prompt });
        let mut model = &self.model;
        if let Some(reference) = reference_image {
            input["img_url"] = Value::String(data_uri(reference).await?);
            model = self.reference_model.as_ref().unwrap_or(&self.model);
        }
        let request_body = match self.kind {
            MediaKind::Image => json!({
                "model": model,
                "input": input,
                "parameters": { "size": "1280*720", "n": 1 }
            }),
            MediaKind::Video => json!({
                "model": model,
                "input": input,
                "parameters": { "size": "1280*720" }
            }),
        };

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, self.kind.endpoint()))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-DashScope-Async", "enable")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let error_text = response.text().await?;
            return Err(GeneratorError::RateLimited(format!(
                "{} generator: {}",
                self.kind.label(),
                error_text
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(GeneratorError::ApiError(format!(
                "{} generation API error (HTTP {}): {}",
                self.kind.label(),
                status,
                error_text
            )));
        }

        let submitted: SubmitResponse = response.json().await?;
        info!(
            "{} task submitted: {} ({})",
            self.kind.label(),
            submitted.output.task_id,
            submitted.output.task_status
        );

        let url = self.wait_for_task(&submitted.output.task_id).await?;

        info!("Downloading {} from: {}", self.kind.label(), url);
        let data = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        files::write_atomic(output_path, data).await?;
        info!("{} saved to: {}", self.kind.label(), output_path.display());

        Ok(output_path.to_path_buf())
    }

    async fn wait_for_task(&self, task_id: &str) -> GeneratorResult<String> {
        let get_url = format!("{}/tasks/{}", self.base_url, task_id);

        for i in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(&get_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await?;
                warn!("Failed to get task status (HTTP {}): {}", status, error_text);
                continue;
            }

            let task: TaskResponse = response.json().await?;
            match task.output.task_status.as_str() {
                "SUCCEEDED" => {
                    let url = match self.kind {
                        MediaKind::Image => task
                            .output
                            .results
                            .and_then(|results| results.into_iter().find_map(|r| r.url)),
                        MediaKind::Video => task.output.video_url,
                    };
                    return url.ok_or_else(|| {
                        GeneratorError::Malformed(format!("task {} succeeded without a URL", task_id))
                    });
                }
                "FAILED" | "CANCELED" | "UNKNOWN" => {
                    return Err(GeneratorError::ApiError(format!(
                        "{} task {} ended as {}: {}",
                        self.kind.label(),
                        task_id,
                        task.output.task_status,
                        task.output.message.unwrap_or_default()
                    )));
                }
                other => {
                    info!("Task status: {} (poll {}/{})", other, i + 1, self.max_polls);
                }
            }
        }

        Err(GeneratorError::Timeout(format!(
            "{} task {} did not finish after {} polls",
            self.kind.label(),
            task_id,
            self.max_polls
        )))
    }
}

async fn data_uri(path: &Path) -> GeneratorResult<String> {
    let bytes = tokio::fs::read(path).await?;
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_data_uri_uses_extension_mime() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("front.jpg");
        std::fs::write(&path, [0xFFu8, 0xD8, 0xFF]).unwrap();

        let uri = data_uri(&path).await.unwrap();
        assert_eq!(uri, "data:image/jpeg;base64,/9j/");
    }
}
