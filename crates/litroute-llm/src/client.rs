//! Chat-completion HTTP client.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::error::{ApiErrorCode, Error, Result};
use crate::prompt::{PromptKind, Verdict};
use crate::types::{ApiErrorResponse, ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

/// DeepSeek API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// DeepSeek general chat model.
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Chat client settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// API root; `/chat/completions` is appended.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Reply length cap. Labels are single words.
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            max_tokens: 10,
        }
    }
}

impl ChatConfig {
    /// DeepSeek defaults with the given key.
    #[must_use]
    pub fn deepseek(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    config: ChatConfig,
}

impl ChatClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is empty, the key is not a valid header
    /// value, or the HTTP client cannot be built.
    pub fn new(config: ChatConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model is empty".into()));
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| Error::InvalidConfig("API key is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    /// Model this client talks to.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Sends a deterministic (temperature 0) completion and returns the reply text.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, error status, malformed body or
    /// an empty reply.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: Some(0.0),
            max_tokens: Some(self.config.max_tokens),
            stream: false,
        };

        debug!(model = %self.config.model, "Sending chat completion");
        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let response = check(response).await?;
        let body: ChatCompletionResponse = serde_json::from_slice(&response.bytes().await?)?;

        if let Some(usage) = &body.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Chat completion finished"
            );
        }

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(Error::EmptyCompletion)
    }

    /// Asks a classification question about `text`.
    ///
    /// An empty completion is reported as an unparseable verdict rather than
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request itself fails.
    pub async fn classify(&self, kind: PromptKind, text: &str) -> Result<Verdict> {
        let reply = match self.complete(kind.messages(text)).await {
            Ok(reply) => reply,
            Err(Error::EmptyCompletion) => return Ok(Verdict::Unparseable(String::new())),
            Err(e) => return Err(e),
        };
        let verdict = kind.parse_reply(&reply);
        if let Verdict::Unparseable(raw) = &verdict {
            warn!(?kind, reply = %raw, "Unrecognised classification reply");
        }
        Ok(verdict)
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let text = response.text().await.unwrap_or_default();
    let (error_type, message) = serde_json::from_str::<ApiErrorResponse>(&text)
        .map_or_else(|_| (String::new(), text.clone()), |body| {
            (body.error.error_type, body.error.message)
        });

    Err(Error::Api {
        status: status.as_u16(),
        code: ApiErrorCode::from_response(status.as_u16(), &error_type),
        message,
        retry_after,
    })
}
