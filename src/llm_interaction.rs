use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::WireMessage;

/// Failure talking to the backend, split the way the chat reports it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not reach the server: {0}")]
    Connectivity(String),
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("correction channel is closed")]
    ChannelClosed,
}

impl TransportError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::ChannelClosed)
    }

    /// The chat entry shown when a turn is abandoned because of this error.
    pub fn user_message(&self) -> String {
        if self.is_connectivity() {
            "Could not connect to the server. Please check your connection and try again.".to_string()
        } else {
            format!("Sorry, an error occurred while generating a response: {}", self)
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connectivity(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Produces a full assistant reply for a conversation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, model: &str, messages: &[WireMessage]) -> Result<String, TransportError>;
}

// Structures matching the backend's /generate-commands endpoint
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    content: String,
}

#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: Client,
    base_url: String,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    #[instrument(skip(self, messages), fields(turns = messages.len()))]
    async fn generate(&self, model: &str, messages: &[WireMessage]) -> Result<String, TransportError> {
        let url = format!("{}/generate-commands", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest { model, messages })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "generation request failed");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let generated = response
            .json::<GenerateResponse>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))?;
        debug!(content = %generated.content, "received model response");
        Ok(generated.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn turns() -> Vec<WireMessage> {
        vec![
            WireMessage::new(Role::System, "rules"),
            WireMessage::new(Role::User, "draw a point"),
        ]
    }

    #[tokio::test]
    async fn test_generate_posts_model_and_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-commands"))
            .and(body_json(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "rules"},
                    {"role": "user", "content": "draw a point"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "```\nA(1,1)\n```"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpModelClient::new(server.uri());
        let content = client.generate("gpt-4o-mini", &turns()).await.unwrap();
        assert_eq!(content, "```\nA(1,1)\n```");
    }

    #[tokio::test]
    async fn test_server_error_is_not_connectivity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-commands"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .mount(&server)
            .await;

        let err = HttpModelClient::new(server.uri())
            .generate("gpt-4o-mini", &turns())
            .await
            .unwrap_err();
        assert!(!err.is_connectivity());
        assert!(matches!(err, TransportError::Status { status: 500, .. }));
        assert!(err.user_message().contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "wrong field"})))
            .mount(&server)
            .await;

        let err = HttpModelClient::new(server.uri())
            .generate("gpt-4o-mini", &turns())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connectivity() {
        let err = HttpModelClient::new("http://127.0.0.1:9")
            .generate("gpt-4o-mini", &turns())
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert!(err.user_message().starts_with("Could not connect"));
    }
}
