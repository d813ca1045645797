//! OpenAI-compatible oracle implementation.
//!
//! Works with: DeepSeek, OpenAI, OpenRouter, Ollama, vLLM, Together AI and
//! any endpoint exposing `/chat/completions`.
//!
//! One request, one attempt: retries and deadlines belong to the loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stepwise_config::OracleSettings;
use stepwise_core::error::OracleError;
use stepwise_core::message::Message;
use stepwise_core::oracle::{Oracle, OracleRequest, OracleResponse, Usage};
use tracing::{debug, warn};

/// An oracle backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatOracle {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatOracle {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Build from configuration. Fails when no API key is configured.
    pub fn from_settings(settings: &OracleSettings) -> Result<Self, OracleError> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                OracleError::NotConfigured(format!(
                    "no API key for '{}'; set STEPWISE_API_KEY or oracle.api_key",
                    settings.provider
                ))
            })?;
        Ok(Self::new(
            settings.provider.clone(),
            settings.base_url.clone(),
            api_key,
            Duration::from_secs(settings.timeout_secs),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                // Tool observations go back as user turns; the endpoint
                // expects tool messages to answer native tool calls.
                role: match m.role.as_str() {
                    "tool" => "user".into(),
                    other => other.into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(request: &OracleRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }
        body
    }
}

/// Map a non-success HTTP status to an oracle error.
fn status_error(status: u16, body: String) -> OracleError {
    match status {
        429 => OracleError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => {
            OracleError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        _ => OracleError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn transport_error(e: reqwest::Error) -> OracleError {
    if e.is_timeout() {
        OracleError::Timeout(e.to_string())
    } else {
        OracleError::Network(e.to_string())
    }
}

fn into_response(api: ApiResponse) -> Result<OracleResponse, OracleError> {
    let choice = api
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OracleError::InvalidResponse("No choices in response".into()))?;

    Ok(OracleResponse {
        text: choice.message.content.unwrap_or_default(),
        usage: api.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
        model: api.model,
    })
}

#[async_trait]
impl Oracle for OpenAiCompatOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            oracle = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(oracle = %self.name, status, body = %error_body, "Oracle returned error");
            return Err(status_error(status, error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        into_response(api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_trimmed() {
        let oracle = OpenAiCompatOracle::new(
            "local",
            "http://localhost:11434/v1/",
            "unused",
            Duration::from_secs(5),
        );
        assert_eq!(oracle.name(), "local");
        assert_eq!(oracle.base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn from_settings_requires_key() {
        let settings = OracleSettings::default();
        let err = OpenAiCompatOracle::from_settings(&settings).err().unwrap();
        assert!(matches!(err, OracleError::NotConfigured(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn from_settings_with_key() {
        let settings = OracleSettings {
            api_key: Some("sk-test".into()),
            base_url: "https://example.test/v1/".into(),
            ..OracleSettings::default()
        };
        let oracle = OpenAiCompatOracle::from_settings(&settings).unwrap();
        assert_eq!(oracle.name(), "deepseek");
        assert_eq!(oracle.base_url(), "https://example.test/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Thought: hi"),
            Message::tool("Tool succeeded: 4"),
        ];
        let api = OpenAiCompatOracle::to_api_messages(&messages);
        let roles: Vec<_> = api.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(api[3].content.as_deref(), Some("Tool succeeded: 4"));
    }

    #[test]
    fn request_body_carries_stop_and_limits() {
        let request = OracleRequest {
            model: "deepseek-chat".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.1,
            max_tokens: Some(1000),
            stop: vec!["\nObservation:".into()],
        };
        let body = OpenAiCompatOracle::request_body(&request);
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stop"][0], "\nObservation:");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn request_body_omits_empty_optionals() {
        let request = OracleRequest {
            model: "m".into(),
            messages: vec![],
            temperature: 0.0,
            max_tokens: None,
            stop: vec![],
        };
        let body = OpenAiCompatOracle::request_body(&request);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(429, String::new()),
            OracleError::RateLimited { .. }
        ));
        assert!(matches!(
            status_error(401, String::new()),
            OracleError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            status_error(403, String::new()),
            OracleError::AuthenticationFailed(_)
        ));
        let server = status_error(502, "bad gateway".into());
        assert!(server.is_transient());
        let client = status_error(400, "bad request".into());
        assert!(!client.is_transient());
        assert!(client.to_string().contains("bad request"));
    }

    #[test]
    fn parse_completion_response() {
        let data = r#"{
            "id": "chatcmpl-1",
            "model": "deepseek-chat",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Thought: x\nFinal Answer: 4"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
        }"#;
        let api: ApiResponse = serde_json::from_str(data).unwrap();
        let response = into_response(api).unwrap();
        assert_eq!(response.text, "Thought: x\nFinal Answer: 4");
        assert_eq!(response.model, "deepseek-chat");
        assert_eq!(response.usage.unwrap().total_tokens, 20);
    }

    #[test]
    fn null_content_becomes_empty_text() {
        let data = r#"{"model":"m","choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let api: ApiResponse = serde_json::from_str(data).unwrap();
        let response = into_response(api).unwrap();
        assert_eq!(response.text, "");
        assert!(response.usage.is_none());
    }

    #[test]
    fn empty_choices_is_invalid() {
        let data = r#"{"model":"m","choices":[]}"#;
        let api: ApiResponse = serde_json::from_str(data).unwrap();
        assert!(matches!(
            into_response(api),
            Err(OracleError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let oracle = OpenAiCompatOracle::new(
            "local",
            "http://127.0.0.1:9/v1",
            "key",
            Duration::from_secs(2),
        );
        let request = OracleRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.1,
            max_tokens: None,
            stop: vec![],
        };
        let err = oracle.complete(request).await.unwrap_err();
        assert!(err.is_transient());
    }
}
