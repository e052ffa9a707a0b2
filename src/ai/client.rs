//! Streaming chat client for OpenAI-compatible endpoints.
//!
//! Speaks `POST {base_url}/chat/completions` with `stream: true`, decoding
//! the SSE chunk stream into typed [`StreamEvent`]s: text tokens, tool-call
//! argument deltas, aggregated tool calls, and structured errors.  Auth
//! failures trigger one token refresh through the configured
//! [`TokenProvider`] before surfacing.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::ai::token_provider::TokenProvider;
use crate::ai::types::{
    ChatMessage, StreamErrorCode, StreamEvent, StreamPhase, ToolCallRequest,
};
use crate::cancel::CancelToken;
use crate::config::AiConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Upstream request failure, already mapped to a structured code.
#[derive(Debug, Clone)]
pub struct RequestError {
    pub code: StreamErrorCode,
    pub message: String,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RequestError {}

/// Boxed event stream returned by [`ChatProvider::stream_chat`].
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'a>>;

/// The upstream LLM seam: implemented by [`ChatClient`] and by mock
/// providers in tests.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn stream_chat<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Value>>,
        cancel: CancelToken,
        extra_system_prompt: Option<String>,
    ) -> EventStream<'a>;

    async fn complete_once(
        &self,
        messages: Vec<ChatMessage>,
        max_completion_tokens: Option<u32>,
    ) -> Result<String, RequestError>;

    /// Model identifier requests are sent with.
    fn model(&self) -> String;

    /// An isolated client for a sub-agent: same endpoint and credentials,
    /// optionally a different model.
    fn child(&self, model_override: Option<&str>) -> Result<Arc<dyn ChatProvider>, String>;
}

#[async_trait]
impl ChatProvider for ChatClient {
    fn stream_chat<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Value>>,
        cancel: CancelToken,
        extra_system_prompt: Option<String>,
    ) -> EventStream<'a> {
        Box::pin(ChatClient::stream_chat(
            self,
            messages,
            tools,
            cancel,
            extra_system_prompt,
        ))
    }

    async fn complete_once(
        &self,
        messages: Vec<ChatMessage>,
        max_completion_tokens: Option<u32>,
    ) -> Result<String, RequestError> {
        ChatClient::complete_once(self, messages, max_completion_tokens).await
    }

    fn model(&self) -> String {
        self.config.model.clone()
    }

    fn child(&self, model_override: Option<&str>) -> Result<Arc<dyn ChatProvider>, String> {
        self.child_with_model(model_override)
            .map(|client| Arc::new(client) as Arc<dyn ChatProvider>)
            .map_err(|e| e.to_string())
    }
}

// ─── Wire chunk shapes ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallChunk {
    index: usize,
    id: Option<String>,
    function: Option<FunctionChunk>,
}

#[derive(Debug, Deserialize)]
struct FunctionChunk {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

// ─── ChatClient ───────────────────────────────────────────────────────────────

/// Thin client over one OpenAI-compatible endpoint.
///
/// Cheap to construct per conversation; sub-agents build their own from a
/// copied config via [`child_with_model`], sharing the parent's token
/// provider.
///
/// [`child_with_model`]: ChatClient::child_with_model
pub struct ChatClient {
    http: reqwest::Client,
    config: AiConfig,
    token_provider: Option<Arc<TokenProvider>>,
}

impl ChatClient {
    pub fn new(
        config: AiConfig,
        token_provider: Option<Arc<TokenProvider>>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;
        Ok(Self {
            http,
            config,
            token_provider,
        })
    }

    /// Build a client from config, constructing a [`TokenProvider`] when
    /// `api_key_command` is set.
    pub fn from_config(config: &AiConfig) -> Result<Self, ClientError> {
        let provider = config
            .api_key_command
            .as_ref()
            .map(|cmd| Arc::new(TokenProvider::new(cmd.clone())));
        Self::new(config.clone(), provider)
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Copy of this client with an optional model override, sharing the
    /// token provider.  Used to construct sub-agent clients.
    pub fn child_with_model(&self, model: Option<&str>) -> Result<Self, ClientError> {
        let mut config = self.config.clone();
        if let Some(m) = model {
            config.model = m.to_owned();
        }
        Self::new(config, self.token_provider.clone())
    }

    async fn resolve_api_key(&self) -> Result<String, RequestError> {
        match &self.token_provider {
            Some(provider) => provider.token().await.map_err(|e| RequestError {
                code: StreamErrorCode::AuthFailed,
                message: e.to_string(),
            }),
            None => Ok(self.config.api_key.clone()),
        }
    }

    /// Refresh the token after an auth failure. Returns false when no
    /// provider is configured or the refresh itself failed.
    async fn try_refresh_token(&self) -> bool {
        match &self.token_provider {
            Some(provider) => match provider.refresh().await {
                Ok(_) => {
                    debug!("token refreshed successfully");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "token refresh failed");
                    false
                }
            },
            None => false,
        }
    }

    fn combined_system_message(&self, extra_system_prompt: Option<&str>) -> ChatMessage {
        let content = match extra_system_prompt {
            Some(extra) if !extra.is_empty() => {
                format!("{extra}\n\n{}", self.config.system_prompt)
            }
            _ => self.config.system_prompt.clone(),
        };
        ChatMessage::system(content)
    }

    async fn post_json(&self, body: &Value) -> Result<reqwest::Response, RequestError> {
        let api_key = self.resolve_api_key().await?;
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut builder = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if !api_key.is_empty() {
            builder = builder.bearer_auth(api_key);
        }

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let response = match tokio::time::timeout(timeout, builder.send()).await {
            Err(_) => return Err(self.timeout_error()),
            Ok(Err(e)) if e.is_timeout() => return Err(self.timeout_error()),
            Ok(Err(e)) => {
                return Err(RequestError {
                    code: StreamErrorCode::Generic,
                    message: format!("AI request failed: {e}"),
                });
            }
            Ok(Ok(resp)) => resp,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body_text = response.text().await.unwrap_or_default();
        Err(classify_http_error(status, &body_text))
    }

    fn timeout_error(&self) -> RequestError {
        RequestError {
            code: StreamErrorCode::Timeout,
            message: format!(
                "AI request timed out after {}s. The API may be slow or unreachable. \
                 Try again, or increase `ai.request_timeout_secs` in your config.",
                self.config.request_timeout_secs
            ),
        }
    }

    // ── Streaming ────────────────────────────────────────────────────────────

    /// Stream one chat completion.
    ///
    /// The returned sequence is finite and not restartable.  Cancellation is
    /// honoured at every chunk boundary: the upstream connection is dropped
    /// and a final `Done` is emitted.
    pub fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Value>>,
        cancel: CancelToken,
        extra_system_prompt: Option<String>,
    ) -> impl Stream<Item = StreamEvent> + '_ {
        stream! {
            let mut full_messages = vec![self.combined_system_message(extra_system_prompt.as_deref())];
            full_messages.extend(messages);

            let mut body = json!({
                "model": self.config.model,
                "messages": full_messages,
                "stream": true,
            });
            if let Some(tools) = &tools {
                body["tools"] = Value::Array(tools.clone());
            }

            yield StreamEvent::Phase(StreamPhase::Connecting);

            let mut refreshed = false;
            let response = loop {
                match self.post_json(&body).await {
                    Ok(resp) => break resp,
                    Err(err) if err.code == StreamErrorCode::AuthFailed
                        && !refreshed
                        && self.token_provider.is_some() =>
                    {
                        refreshed = true;
                        yield StreamEvent::Retrying {
                            attempt: 1,
                            message: "refreshing credentials".to_owned(),
                        };
                        if !self.try_refresh_token().await {
                            yield StreamEvent::Error {
                                message: "Authentication failed. Check your API key or api_key_command."
                                    .to_owned(),
                                code: StreamErrorCode::AuthFailed,
                            };
                            return;
                        }
                    }
                    Err(err) => {
                        yield StreamEvent::Error { message: err.message, code: err.code };
                        return;
                    }
                }
            };

            yield StreamEvent::Phase(StreamPhase::Waiting);

            let mut events = response.bytes_stream().eventsource();
            let mut current_tool_calls: BTreeMap<usize, PartialToolCall> = BTreeMap::new();
            let mut streaming = false;

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        yield StreamEvent::Done;
                        return;
                    }
                    next = events.next() => next,
                };

                let event = match event {
                    None => {
                        yield StreamEvent::Done;
                        return;
                    }
                    Some(Err(e)) => {
                        yield StreamEvent::Error {
                            message: format!("stream error: {e}"),
                            code: StreamErrorCode::Generic,
                        };
                        return;
                    }
                    Some(Ok(event)) => event,
                };

                if event.data == "[DONE]" {
                    yield StreamEvent::Done;
                    return;
                }

                let chunk: ChatChunk = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(error = %e, "skipping unparseable stream chunk");
                        continue;
                    }
                };
                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };

                if !streaming {
                    streaming = true;
                    yield StreamEvent::Phase(StreamPhase::Streaming);
                }

                if let Some(content) = choice.delta.content
                    && !content.is_empty()
                {
                    yield StreamEvent::Token { content };
                }

                if let Some(deltas) = choice.delta.tool_calls {
                    for tc in deltas {
                        let entry = current_tool_calls.entry(tc.index).or_default();
                        if let Some(id) = tc.id
                            && !id.is_empty()
                        {
                            entry.id = id;
                        }
                        if let Some(func) = tc.function {
                            if let Some(name) = func.name
                                && !name.is_empty()
                            {
                                entry.name = name;
                            }
                            if let Some(args) = func.arguments
                                && !args.is_empty()
                            {
                                entry.arguments.push_str(&args);
                                yield StreamEvent::ToolCallArgsDelta {
                                    index: tc.index,
                                    tool_name: entry.name.clone(),
                                    delta: args,
                                };
                            }
                        }
                    }
                }

                match choice.finish_reason.as_deref() {
                    Some("tool_calls") => {
                        for (_idx, partial) in std::mem::take(&mut current_tool_calls) {
                            let arguments = serde_json::from_str::<Value>(&partial.arguments)
                                .unwrap_or_else(|_| Value::Object(Default::default()));
                            yield StreamEvent::ToolCall(ToolCallRequest {
                                id: partial.id,
                                name: partial.name,
                                arguments,
                            });
                        }
                        return;
                    }
                    Some("stop") => {
                        yield StreamEvent::Done;
                        return;
                    }
                    _ => {}
                }
            }
        }
    }

    // ── One-shot completions ─────────────────────────────────────────────────

    /// Single non-streaming completion; used for compaction summaries and
    /// title generation.
    pub async fn complete_once(
        &self,
        messages: Vec<ChatMessage>,
        max_completion_tokens: Option<u32>,
    ) -> Result<String, RequestError> {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(max) = max_completion_tokens {
            body["max_completion_tokens"] = json!(max);
        }

        let mut refreshed = false;
        let response = loop {
            match self.post_json(&body).await {
                Ok(resp) => break resp,
                Err(err)
                    if err.code == StreamErrorCode::AuthFailed
                        && !refreshed
                        && self.token_provider.is_some() =>
                {
                    refreshed = true;
                    if !self.try_refresh_token().await {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        };

        let parsed: CompletionResponse = response.json().await.map_err(|e| RequestError {
            code: StreamErrorCode::Generic,
            message: format!("failed to parse completion response: {e}"),
        })?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    /// Generate a short conversation title from the first user message.
    pub async fn generate_title(&self, user_message: &str) -> String {
        let messages = vec![
            ChatMessage::system(
                "Generate a short title (3-6 words) for a conversation that starts \
                 with the following message. Return only the title, no quotes or punctuation.",
            ),
            ChatMessage::user(user_message),
        ];
        match self.complete_once(messages, Some(20)).await {
            Ok(title) => {
                let trimmed = title.trim().trim_matches('"').trim_matches('\'').trim();
                if trimmed.is_empty() {
                    "New Conversation".to_owned()
                } else {
                    trimmed.to_owned()
                }
            }
            Err(e) => {
                warn!(error = %e.message, "title generation failed");
                "New Conversation".to_owned()
            }
        }
    }
}

/// Map an HTTP error status + body to a structured stream error.
fn classify_http_error(status: reqwest::StatusCode, body: &str) -> RequestError {
    use reqwest::StatusCode;

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RequestError {
            code: StreamErrorCode::AuthFailed,
            message: "Authentication failed. Check your API key or api_key_command.".to_owned(),
        },
        StatusCode::TOO_MANY_REQUESTS => RequestError {
            code: StreamErrorCode::RateLimit,
            message: "AI provider rate limit reached. Please wait a moment and try again."
                .to_owned(),
        },
        StatusCode::BAD_REQUEST if body.to_lowercase().contains("context_length") => RequestError {
            code: StreamErrorCode::ContextLengthExceeded,
            message: "Conversation too long for model context window.".to_owned(),
        },
        StatusCode::BAD_REQUEST => {
            let detail = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
                .unwrap_or_else(|| "bad request".to_owned());
            RequestError {
                code: StreamErrorCode::Generic,
                message: format!("AI request error: {detail}"),
            }
        }
        other => RequestError {
            code: StreamErrorCode::Generic,
            message: format!("AI request failed with status {other}"),
        },
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ChatClient {
        ChatClient::from_config(&AiConfig::default()).unwrap()
    }

    #[test]
    fn system_message_combines_extra_prompt_first() {
        let c = client();
        let msg = c.combined_system_message(Some("EXTRA"));
        assert!(msg.content.starts_with("EXTRA\n\n"));
        assert!(msg.content.contains(&c.config.system_prompt));
    }

    #[test]
    fn system_message_without_extra_is_base_prompt() {
        let c = client();
        let msg = c.combined_system_message(None);
        assert_eq!(msg.content, c.config.system_prompt);
    }

    #[test]
    fn child_client_overrides_model() {
        let c = client();
        let child = c.child_with_model(Some("gpt-4o")).unwrap();
        assert_eq!(child.config().model, "gpt-4o");
        // Parent unchanged.
        assert_eq!(c.config().model, AiConfig::default().model);
    }

    #[test]
    fn child_client_without_override_keeps_model() {
        let c = client();
        let child = c.child_with_model(None).unwrap();
        assert_eq!(child.config().model, c.config().model);
    }

    #[test]
    fn classify_401_is_auth_failed() {
        let err = classify_http_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.code, StreamErrorCode::AuthFailed);
    }

    #[test]
    fn classify_429_is_rate_limit() {
        let err = classify_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err.code, StreamErrorCode::RateLimit);
    }

    #[test]
    fn classify_400_context_length() {
        let body = r#"{"error":{"code":"context_length_exceeded","message":"too long"}}"#;
        let err = classify_http_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(err.code, StreamErrorCode::ContextLengthExceeded);
    }

    #[test]
    fn classify_400_other_is_generic_with_detail() {
        let body = r#"{"error":{"message":"bad model"}}"#;
        let err = classify_http_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(err.code, StreamErrorCode::Generic);
        assert!(err.message.contains("bad model"));
    }

    #[test]
    fn classify_500_is_generic() {
        let err = classify_http_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(err.code, StreamErrorCode::Generic);
    }
}
