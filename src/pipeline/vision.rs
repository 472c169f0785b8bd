//! Vision extraction: one page image + system prompt → raw completion text.
//!
//! A client performs exactly one outbound request per call and surfaces any
//! failure immediately as an [`ExtractionCause`]. Retry and skip decisions
//! belong to the orchestrator ([`crate::bookmark`]), which keeps partial
//! failures visible instead of silently degrading inside the transport.
//!
//! Two transports are provided:
//!
//! * [`OpenAiCompatibleClient`] — a direct `chat/completions` call against
//!   any OpenAI-compatible base URL (OpenAI, DeepSeek, OpenRouter, LM Studio,
//!   Ollama's `/v1`, …) using the endpoint and credential from
//!   [`ModelConfig`].
//! * [`ProviderClient`] — delegates to an `edgequake-llm` provider, for
//!   providers with their own wire formats (Anthropic, Gemini, Azure).

use crate::config::ModelConfig;
use crate::error::ExtractionCause;
use crate::pipeline::encode;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sends one page image to a multimodal model and returns its raw answer.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn extract(&self, image_png: &[u8], system_prompt: &str)
        -> Result<String, ExtractionCause>;
}

// ── OpenAI-compatible HTTP transport ─────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum RequestMessage<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Longest error body kept in an [`ExtractionCause::HttpStatus`].
const MAX_ERROR_BODY: usize = 500;

/// Direct client for `POST {base_url}/chat/completions`.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    json_mode: bool,
    timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    /// Build a client with a per-request timeout of `timeout_secs`.
    pub fn new(config: &ModelConfig, timeout_secs: u64) -> Result<Self, ExtractionCause> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractionCause::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: completions_url(&config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            json_mode: config.json_mode,
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, image_png: &[u8], system_prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                RequestMessage::System {
                    content: system_prompt,
                },
                RequestMessage::User {
                    content: vec![ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: encode::png_data_uri(image_png),
                            detail: "high",
                        },
                    }],
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: self.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ExtractionCause {
        if e.is_timeout() {
            ExtractionCause::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            ExtractionCause::Transport(e.to_string())
        }
    }
}

/// `https://host/v1/` → `https://host/v1/chat/completions`
fn completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

/// Extract the completion text from a chat-completion envelope.
fn completion_text(body: &str) -> Result<String, ExtractionCause> {
    let envelope: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ExtractionCause::MalformedEnvelope(e.to_string()))?;
    let choice = envelope
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ExtractionCause::MalformedEnvelope("no choices".into()))?;
    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ExtractionCause::EmptyCompletion),
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &body[..end])
}

#[async_trait]
impl VisionClient for OpenAiCompatibleClient {
    async fn extract(
        &self,
        image_png: &[u8],
        system_prompt: &str,
    ) -> Result<String, ExtractionCause> {
        let body = self.request_body(image_png, system_prompt);
        debug!(
            "POST {} (model {}, {} byte image)",
            self.endpoint,
            self.model,
            image_png.len()
        );

        let mut request = self.http.post(&self.endpoint).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(ExtractionCause::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        let content = completion_text(&text)?;
        debug!("Completion: {} chars", content.len());
        Ok(content)
    }
}

// ── edgequake-llm transport ──────────────────────────────────────────────

/// Adapter over an `edgequake-llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout_secs: u64,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ModelConfig, timeout_secs: u64) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
            timeout_secs,
        }
    }
}

#[async_trait]
impl VisionClient for ProviderClient {
    async fn extract(
        &self,
        image_png: &[u8],
        system_prompt: &str,
    ) -> Result<String, ExtractionCause> {
        // The image carries all the content; the user text stays empty.
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images("", vec![encode::png_image_data(image_png)]),
        ];

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .map_err(|_| ExtractionCause::Timeout {
                secs: self.timeout_secs,
            })?
            .map_err(|e| ExtractionCause::Provider(e.to_string()))?;

        debug!(
            "Provider answered: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        if response.content.trim().is_empty() {
            return Err(ExtractionCause::EmptyCompletion);
        }
        Ok(response.content)
    }
}
