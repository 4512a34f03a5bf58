//! HTTP model client
//!
//! One `reqwest`-backed client implementing [`ModelClient`] for Anthropic and
//! OpenAI-compatible providers. The provider is chosen by the `provider:model`
//! string ("anthropic:claude-sonnet-4-5", "openai:gpt-4o", "ollama:qwen3").

use anyhow::{anyhow, Result};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::{GenerateError, GenerateResponse, ModelClient, StreamPart};
use super::format::{anthropic, openai};
use super::types::{ModelMessage, ToolDef};

const DEFAULT_MAX_TOKENS: usize = 8192;

/// Wire format spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    Anthropic,
    OpenAi,
}

/// Parsed `provider:model` specification.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub provider: String,
    pub model: String,
    pub format: ApiFormat,
    pub base_url: Option<String>,
}

impl ProviderSpec {
    /// Parse a model string. A missing provider prefix defaults to anthropic.
    pub fn parse(model_string: &str) -> Result<Self> {
        let (provider, model) = match model_string.split_once(':') {
            Some((p, m)) if !p.is_empty() && !m.is_empty() => (p.to_string(), m.to_string()),
            _ => ("anthropic".to_string(), model_string.to_string()),
        };

        if model.is_empty() {
            return Err(anyhow!("empty model in model string {model_string:?}"));
        }

        let format = match provider.as_str() {
            "anthropic" => ApiFormat::Anthropic,
            // Everything else speaks the Chat Completions dialect.
            "openai" | "ollama" | "openrouter" | "google" | "deepseek" | "xai" => ApiFormat::OpenAi,
            other => {
                return Err(anyhow!("unsupported provider {other:?} in model string"));
            }
        };

        Ok(Self {
            provider,
            model,
            format,
            base_url: None,
        })
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    fn api_url(&self) -> String {
        if let Some(base) = &self.base_url {
            let base = base.trim_end_matches('/');
            return match self.format {
                ApiFormat::Anthropic => format!("{base}/v1/messages"),
                ApiFormat::OpenAi => format!("{base}/v1/chat/completions"),
            };
        }

        match self.provider.as_str() {
            "anthropic" => "https://api.anthropic.com/v1/messages".to_string(),
            "openai" => "https://api.openai.com/v1/chat/completions".to_string(),
            "openrouter" => "https://openrouter.ai/api/v1/chat/completions".to_string(),
            "deepseek" => "https://api.deepseek.com/v1/chat/completions".to_string(),
            "xai" => "https://api.x.ai/v1/chat/completions".to_string(),
            "google" => {
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
                    .to_string()
            }
            // Local daemon.
            "ollama" => "http://localhost:11434/v1/chat/completions".to_string(),
            _ => "https://api.anthropic.com/v1/messages".to_string(),
        }
    }

    fn api_key_env(&self) -> Option<&'static str> {
        match self.provider.as_str() {
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            "openrouter" => Some("OPENROUTER_API_KEY"),
            "deepseek" => Some("DEEPSEEK_API_KEY"),
            "xai" => Some("XAI_API_KEY"),
            "google" => Some("GEMINI_API_KEY"),
            _ => None,
        }
    }
}

/// HTTP client for one provider endpoint.
pub struct HttpModelClient {
    http: reqwest::Client,
    spec: ProviderSpec,
    api_key: Option<String>,
}

impl HttpModelClient {
    pub fn new(spec: ProviderSpec, api_key: Option<String>) -> Self {
        let api_key = api_key.or_else(|| {
            spec.api_key_env()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.is_empty())
        });

        Self {
            http: reqwest::Client::new(),
            spec,
            api_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.spec.model
    }

    fn build_body(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
        stream: bool,
    ) -> Value {
        match self.spec.format {
            ApiFormat::Anthropic => anthropic::build_body(
                &self.spec.model,
                system_prompt,
                messages,
                tools,
                DEFAULT_MAX_TOKENS,
                stream,
            ),
            ApiFormat::OpenAi => openai::build_body(
                &self.spec.model,
                system_prompt,
                messages,
                tools,
                DEFAULT_MAX_TOKENS,
                stream,
            ),
        }
    }

    fn build_request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self.http.post(self.spec.api_url()).json(body);

        match self.spec.format {
            ApiFormat::Anthropic => {
                request = request.header("anthropic-version", "2023-06-01");
                if let Some(key) = &self.api_key {
                    request = request.header("x-api-key", key);
                }
            }
            ApiFormat::OpenAi => {
                if let Some(key) = &self.api_key {
                    request = request.bearer_auth(key);
                }
            }
        }

        request
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, GenerateError> {
        let response = self
            .build_request(body)
            .send()
            .await
            .map_err(|e| GenerateError::Fatal(format!("request to {} failed: {e}", self.spec.provider)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_http_error(status.as_u16(), &text))
    }
}

/// Map a provider error response onto the generation error taxonomy.
///
/// 429 and 5xx (including Anthropic's 529 `overloaded_error`) are transient
/// and retried by the backoff layer; everything else is fatal.
fn classify_http_error(status: u16, body: &str) -> GenerateError {
    if status == 429 || status >= 500 || body.contains("overloaded_error") {
        GenerateError::Overloaded(format!("HTTP {status}: {}", truncate(body, 300)))
    } else {
        GenerateError::Fatal(format!("HTTP {status}: {}", truncate(body, 300)))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait::async_trait]
impl ModelClient for HttpModelClient {
    fn provider_id(&self) -> &str {
        &self.spec.provider
    }

    async fn generate(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
        cancel: CancellationToken,
    ) -> Result<GenerateResponse, GenerateError> {
        let body = self.build_body(messages, system_prompt, tools, false);
        debug!(
            provider = %self.spec.provider,
            model = %self.spec.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending generate request"
        );

        let json: Value = tokio::select! {
            _ = cancel.cancelled() => return Err(GenerateError::Cancelled),
            result = async {
                let response = self.send(&body).await?;
                response
                    .json()
                    .await
                    .map_err(|e| GenerateError::Fatal(format!("invalid response body: {e}")))
            } => result?,
        };

        let (message, usage) = match self.spec.format {
            ApiFormat::Anthropic => anthropic::parse_response(&json),
            ApiFormat::OpenAi => openai::parse_response(&json),
        };

        Ok(GenerateResponse { message, usage })
    }

    async fn stream(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, GenerateError> {
        let body = self.build_body(messages, system_prompt, tools, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let format = self.spec.format;
        let provider = self.spec.provider.clone();

        tokio::spawn(async move {
            let mut anthropic_parser = anthropic::SseParser::new();
            let mut openai_parser = openai::SseParser::new();
            let mut buffer = String::new();
            let mut byte_stream = response.bytes_stream();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(provider = %provider, "Stream read error: {e}");
                        let _ = tx.send(StreamPart::Error {
                            error: format!("stream read error: {e}"),
                        });
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited; keep the trailing partial line.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    let parts = match format {
                        ApiFormat::Anthropic => anthropic_parser.feed(data),
                        ApiFormat::OpenAi => openai_parser.feed(data),
                    };
                    for part in parts {
                        if tx.send(part).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_model_string() {
        let spec = ProviderSpec::parse("openai:gpt-4o").unwrap();
        assert_eq!(spec.provider, "openai");
        assert_eq!(spec.model, "gpt-4o");
        assert_eq!(spec.format, ApiFormat::OpenAi);
    }

    #[test]
    fn bare_model_defaults_to_anthropic() {
        let spec = ProviderSpec::parse("claude-sonnet-4-5").unwrap();
        assert_eq!(spec.provider, "anthropic");
        assert_eq!(spec.format, ApiFormat::Anthropic);
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(ProviderSpec::parse("parrot:polly").is_err());
    }

    #[test]
    fn overloaded_and_rate_limit_errors_are_retryable() {
        assert!(classify_http_error(529, r#"{"error":{"type":"overloaded_error"}}"#).is_retryable());
        assert!(classify_http_error(429, "slow down").is_retryable());
        assert!(!classify_http_error(401, "bad key").is_retryable());
        assert!(!classify_http_error(400, "malformed").is_retryable());
    }
}
