//! Chat completion support for name disambiguation
//!
//! Provides a `ChatBackend` trait and a Gemini `generateContent` client.
//! Callers treat any `ChatError` as "no answer"; nothing here is fatal to a run.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::LlmConfig;

// ============================================================================
// ChatBackend trait
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
}

/// Abstraction over chat completion providers.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a structured message list and return the model's text reply.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ChatError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no text")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

/// Build the configured backend, or `None` when the LLM is switched off.
pub fn create_chat_backend(config: &LlmConfig) -> Result<Option<Box<dyn ChatBackend>>, ChatError> {
    if !config.enabled {
        return Ok(None);
    }
    let client = GeminiChatClient::new(config.clone())?;
    Ok(Some(Box::new(client)))
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

fn to_request(messages: &[ChatMessage]) -> GenerateRequest {
    let system: Vec<GeminiPart> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| GeminiPart {
            text: m.content.clone(),
        })
        .collect();

    let contents = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart {
                text: m.content.clone(),
            }],
        })
        .collect();

    GenerateRequest {
        system_instruction: (!system.is_empty()).then_some(GeminiContent {
            role: None,
            parts: system,
        }),
        contents,
    }
}

// ============================================================================
// GeminiChatClient
// ============================================================================

/// Gemini chat client — calls the `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiChatClient {
    client: Client,
    config: LlmConfig,
    api_key: String,
}

impl GeminiChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, ChatError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        if api_key.is_empty() {
            return Err(ChatError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.generate_once(messages)).await;

        match result {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All chat retry attempts failed"
                );
                Err(ChatError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn generate_once(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&to_request(messages))
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");

            return Err(ChatError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        Ok(text)
    }
}

#[async_trait]
impl ChatBackend for GeminiChatClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ChatError> {
        self.generate(messages)
            .await
            .map(|content| ChatResponse { content })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String, api_key: &str) -> LlmConfig {
        LlmConfig {
            enabled: true,
            model: "gemini-test".to_string(),
            api_key: Some(api_key.to_string()),
            base_url,
            max_retries: 3,
            retry_delay_ms: 10,
            timeout_seconds: 5,
        }
    }

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": text }] } }
            ]
        })
    }

    #[tokio::test]
    async fn test_generate_sends_system_and_user_parts() {
        let mock_server = MockServer::start().await;
        let client = GeminiChatClient::new(test_config(mock_server.uri(), "test-key"))
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_json(serde_json::json!({
                "systemInstruction": { "parts": [{ "text": "pick one" }] },
                "contents": [{ "role": "user", "parts": [{ "text": "Acme?" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("Acme Corp")))
            .mount(&mock_server)
            .await;

        let messages = vec![ChatMessage::system("pick one"), ChatMessage::user("Acme?")];
        let response = client.invoke(&messages).await;

        assert!(response.is_ok(), "Expected Ok, got Err: {:?}", response.err());
        assert_eq!(response.unwrap().content, "Acme Corp");
    }

    #[tokio::test]
    async fn test_generate_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = GeminiChatClient::new(test_config(mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("Globex")))
            .mount(&mock_server)
            .await;

        let text = client.generate(&[ChatMessage::user("hi")]).await;
        assert_eq!(text.unwrap(), "Globex");
    }

    #[tokio::test]
    async fn test_generate_exhausts_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client = GeminiChatClient::new(test_config(mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "boom" }
            })))
            .mount(&mock_server)
            .await;

        match client.generate(&[ChatMessage::user("hi")]).await {
            Err(ChatError::RetryExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_is_an_error() {
        let mock_server = MockServer::start().await;
        let mut config = test_config(mock_server.uri(), "test-key");
        config.max_retries = 0;
        let client = GeminiChatClient::new(config).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .mount(&mock_server)
            .await;

        assert!(client.generate(&[ChatMessage::user("hi")]).await.is_err());
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let mut config = test_config("http://localhost".to_string(), "");
        config.api_key = None;
        // Only meaningful when the environment does not supply a key.
        if std::env::var("GOOGLE_API_KEY").is_err() {
            assert!(matches!(
                GeminiChatClient::new(config),
                Err(ChatError::MissingApiKey)
            ));
        }
    }

    #[test]
    fn test_disabled_config_builds_no_backend() {
        let mut config = test_config("http://localhost".to_string(), "k");
        config.enabled = false;
        assert!(create_chat_backend(&config).unwrap().is_none());
    }

    #[test]
    fn test_request_without_system_messages_omits_instruction() {
        let request = to_request(&[ChatMessage::user("only user")]);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("systemInstruction").is_none());
        assert_eq!(value["contents"][0]["parts"][0]["text"], "only user");
    }
}
