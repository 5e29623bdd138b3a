use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;

use crate::config::ClientConfig;
use crate::retry::{retry_async, RetryPolicy};

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Raw body chunks of a long-lived response. Dropping it releases the
/// connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Authenticated request transport used by the streaming client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a POST to `path` (relative to the API base URL) and returns the
    /// raw response body.
    async fn post(&self, path: &str) -> Result<String, TransportError>;

    /// Opens an unbuffered GET against an absolute URL and returns the body
    /// as a chunk stream.
    async fn get_stream(&self, url: &Url) -> Result<ByteStream, TransportError>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::WebSocket(_) | Self::InvalidUrl { .. } => false,
        }
    }
}

/// reqwest-backed [`Transport`] with bearer authentication.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    access_token: SecretString,
    base_url: String,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            access_token: config.access_token.clone(),
            base_url: config.base_url().to_string(),
            attempt_timeout: config.attempt_timeout,
            retry_policy: config.retry_policy.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.access_token.expose_secret()),
            )
            .header(ACCEPT, "application/json")
    }

    async fn post_attempt(&self, endpoint: &str) -> Result<String, TransportError> {
        let builder = self
            .http
            .post(endpoint)
            .timeout(self.attempt_timeout)
            .body(Vec::new());

        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, path: &str) -> Result<String, TransportError> {
        let endpoint = self.endpoint(path);

        retry_async(
            &self.retry_policy,
            |_| self.post_attempt(&endpoint),
            TransportError::is_retryable,
        )
        .await
    }

    async fn get_stream(&self, url: &Url) -> Result<ByteStream, TransportError> {
        let response = self.authorized(self.http.get(url.clone())).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        debug!(event = "feed_response_opened", status = status.as_u16());
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
        Ok(Box::pin(chunks))
    }
}

/// Extracts the brokerage's error message from a failed response body, or
/// falls back to a bounded prefix of the raw body.
pub(crate) fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct Fault {
        faultstring: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum ErrorList {
        Many(Vec<String>),
        One(String),
    }

    #[derive(Debug, Deserialize)]
    struct Errors {
        error: ErrorList,
    }

    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        fault: Option<Fault>,
        #[serde(default)]
        errors: Option<Errors>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(fault) = parsed.fault {
            return fault.faultstring;
        }
        match parsed.errors.map(|errors| errors.error) {
            Some(ErrorList::Many(messages)) if !messages.is_empty() => return messages.join("; "),
            Some(ErrorList::One(message)) => return message,
            _ => {}
        }
        if let Some(message) = parsed.error {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
