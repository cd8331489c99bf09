use crate::error::{GeneratorError, GeneratorResult};
use crate::rate_limit::RateLimiter;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// OpenAI-compatible chat completions client (OpenRouter by default).
#[derive(Debug, Clone)]
pub struct ChatClient {
    model: String,
    api_key: String,
    base_url: String,
    client: Client,
    limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u32>,
}

impl ChatClient {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> GeneratorResult<Self> {
        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: super::http_client()?,
            limiter,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends one user prompt with an optional system prompt and returns the
    /// assistant's text.
    pub async fn complete(&self, system: Option<&str>, prompt: &str) -> GeneratorResult<String> {
        self.limiter.acquire().await?;

        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let request_body = json!({
            "model": self.model,
            "messages": messages,
        });

        debug!("Chat request to {} ({})", self.base_url, self.model);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let error_text = response.text().await?;
            return Err(GeneratorError::RateLimited(format!(
                "chat model {}: {}",
                self.model, error_text
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(GeneratorError::ApiError(format!(
                "chat API error (HTTP {}): {}",
                status, error_text
            )));
        }

        let response: ChatResponse = response.json().await?;
        if let Some(tokens) = response.usage.as_ref().and_then(|u| u.total_tokens) {
            info!("Chat completion used {} tokens", tokens);
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GeneratorError::Malformed("chat response has no content".to_string()))
    }

    /// Like [`complete`](Self::complete) but parses the reply as JSON,
    /// tolerating a surrounding markdown code fence.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system: Option<&str>,
        prompt: &str,
    ) -> GeneratorResult<T> {
        let text = self.complete(system, prompt).await?;
        serde_json::from_str(strip_code_fence(&text)).map_err(|e| {
            GeneratorError::Malformed(format!("expected JSON from chat model: {}", e))
        })
    }
}

/// Removes a ```json ... ``` wrapper if the model added one.
pub fn strip_code_fence(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\nplain\n```"), "plain");
    }
}
