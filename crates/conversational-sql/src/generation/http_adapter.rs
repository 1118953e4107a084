//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Completion, GenerationAdapter, TokenUsage};
use crate::config::GeneratorConfig;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

pub struct HttpGenerationAdapter {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    http_client: reqwest::Client,
}

impl HttpGenerationAdapter {
    pub fn new(config: &GeneratorConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        info!("Generation adapter initialized: {} (model {})", config.base_url, model);
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            // overall deadlines are enforced by the caller
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Adapter for the SQL-writing model
    pub fn for_sql(config: &GeneratorConfig) -> Self {
        Self::new(config, config.sql_model.clone())
    }

    /// Adapter for the answer-writing model
    pub fn for_answers(config: &GeneratorConfig) -> Self {
        Self::new(config, config.answer_model.clone())
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl GenerationAdapter for HttpGenerationAdapter {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<Completion> {
        debug!("Requesting completion from {}", self.model);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut builder = self.http_client.post(self.completions_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("LLM backend request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM backend returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {}", e))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| anyhow::anyhow!("LLM response contained no message"))?;

        let usage = completion.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        if let Some(u) = &usage {
            info!(
                "LLM call completed: prompt_tokens={}, completion_tokens={}",
                u.prompt_tokens, u.completion_tokens
            );
        }

        Ok(Completion { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(url: String, api_key: Option<&str>) -> GeneratorConfig {
        GeneratorConfig {
            base_url: url,
            api_key: api_key.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_returns_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"```sql\nSELECT 1\n```"}}],
                    "usage":{"prompt_tokens":12,"completion_tokens":4,"total_tokens":16}}"#,
            )
            .create_async()
            .await;

        let adapter = HttpGenerationAdapter::for_sql(&config_for(server.url(), Some("sk-test")));
        let completion = adapter.complete("system", "user").await.unwrap();

        assert_eq!(completion.text, "```sql\nSELECT 1\n```");
        assert_eq!(completion.usage.unwrap().total_tokens, 16);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refusal_text_is_passed_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"ERROR: no such data"}}]}"#)
            .create_async()
            .await;

        let adapter = HttpGenerationAdapter::for_answers(&config_for(server.url(), None));
        let completion = adapter.complete("s", "u").await.unwrap();
        assert_eq!(
            crate::generation::GenerationOutcome::from_text(&completion.text),
            crate::generation::GenerationOutcome::Refused("no such data".to_string())
        );
        assert!(completion.usage.is_none());
    }

    #[tokio::test]
    async fn test_http_error_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("model crashed")
            .create_async()
            .await;

        let adapter = HttpGenerationAdapter::for_sql(&config_for(server.url(), None));
        let err = adapter.complete("s", "u").await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("model crashed"));
    }
}
