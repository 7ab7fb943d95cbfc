use anyhow::{Context, Result};
use async_trait::async_trait;
use chatbot_types::Message;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

use super::{GenerationRequest, ReplyGenerator, ReplyStream};
use crate::config::LlmConfig;

/// Streaming client for OpenAI-compatible chat completions (HTTP direct, no SDK).
pub struct OpenAiGenerator {
    http_client: reqwest::Client,
    base_url: String,
    config: LlmConfig,
}

impl OpenAiGenerator {
    pub fn new(config: LlmConfig, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .context("Invalid API key format")?,
            );
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    fn build_chat_request(&self, request: &GenerationRequest) -> Value {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.extend(request.history.iter().map(convert_message));
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let mut payload = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
        });
        if let (Some(max_tokens), Some(obj)) = (self.config.max_tokens, payload.as_object_mut()) {
            obj.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
        }
        payload
    }
}

fn convert_message(message: &Message) -> Value {
    serde_json::json!({ "role": message.role.as_str(), "content": message.content })
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded `data:` payload.
#[derive(Debug, PartialEq)]
enum ChunkEvent {
    Text(String),
    Done,
}

fn parse_data_line(data: &str) -> Result<Vec<ChunkEvent>> {
    if data == "[DONE]" {
        return Ok(vec![ChunkEvent::Done]);
    }

    let chunk: ChatStreamChunk =
        serde_json::from_str(data).context("Failed to parse chat chunk")?;
    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(ChunkEvent::Text(text));
        }
        if choice.finish_reason.is_some() {
            events.push(ChunkEvent::Done);
        }
    }
    Ok(events)
}

fn parse_chat_stream(response: reqwest::Response) -> ReplyStream {
    let stream = response.bytes_stream();

    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(stream);
        let mut buffer: VecDeque<u8> = VecDeque::with_capacity(8192);

        'read: while let Some(chunk_result) = byte_chunks.next().await {
            let bytes = match chunk_result {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(anyhow::anyhow!("Stream error: {}", e));
                    break;
                }
            };
            buffer.extend(bytes);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=newline_pos).collect();
                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    continue;
                };
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };

                match parse_data_line(data.trim_start()) {
                    Ok(events) => {
                        for event in events {
                            match event {
                                ChunkEvent::Text(text) => yield Ok(text),
                                ChunkEvent::Done => break 'read,
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break 'read;
                    }
                }
            }
        }
    })
}

#[async_trait]
impl ReplyGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ReplyStream> {
        let payload = self.build_chat_request(&request);
        tracing::debug!(
            thread_id = %request.thread_id,
            model = %self.config.model,
            history_len = request.history.len(),
            "Requesting chat completion"
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error ({}): {}", status, error_text);
        }

        Ok(parse_chat_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(system_prompt: Option<&str>) -> OpenAiGenerator {
        let config = LlmConfig {
            base_url: "http://localhost:9999/v1/".to_string(),
            max_tokens: Some(256),
            system_prompt: system_prompt.map(str::to_string),
            ..Default::default()
        };
        OpenAiGenerator::new(config, "test-key").unwrap()
    }

    #[test]
    fn test_payload_carries_history_then_prompt() {
        let client = generator(Some("Be brief."));
        assert_eq!(client.base_url, "http://localhost:9999/v1");

        let payload = client.build_chat_request(&GenerationRequest {
            thread_id: "t1".to_string(),
            prompt: "and now?".to_string(),
            history: vec![
                Message::user("hi").unwrap(),
                Message::assistant("hello").unwrap(),
            ],
        });

        let roles: Vec<&str> = payload["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(payload["messages"][3]["content"], "and now?");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["max_tokens"], 256);
    }

    #[test]
    fn test_payload_omits_unset_options() {
        let mut client = generator(None);
        client.config.max_tokens = None;
        let payload = client.build_chat_request(&GenerationRequest {
            thread_id: "t1".to_string(),
            prompt: "hi".to_string(),
            history: Vec::new(),
        });
        assert_eq!(payload["messages"].as_array().unwrap().len(), 1);
        assert!(payload.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_data_lines() {
        let text = r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_data_line(text).unwrap(), vec![ChunkEvent::Text("Hel".to_string())]);

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert!(parse_data_line(role_only).unwrap().is_empty());

        let stop = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_data_line(stop).unwrap(), vec![ChunkEvent::Done]);

        assert_eq!(parse_data_line("[DONE]").unwrap(), vec![ChunkEvent::Done]);
        assert!(parse_data_line("{broken").is_err());
    }
}
