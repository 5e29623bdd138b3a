//! Streaming session client.
//!
//! [`StreamingClient`] creates sessions through the injected [`Transport`]
//! and opens event feeds for them, either as a chunked HTTP response or over
//! the WebSocket endpoint. Both feeds produce an [`EventStream`].

use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tracing::debug;

use crate::config::{ClientConfig, WEBSOCKET_EVENTS_URL};
use crate::stream::framing::{DecodeError, Framing};
use crate::stream::proto::{EventKind, StreamSession, WebSocketSubscription};
use crate::stream::session::EventStream;
use crate::stream::websocket::open_websocket;
use crate::transport::{HttpTransport, Transport, TransportError};

/// Session-creation path relative to the API base URL.
pub const SESSION_PATH: &str = "markets/events/session";

/// Entry point for creating sessions and opening event feeds.
#[derive(Clone)]
pub struct StreamingClient {
    transport: Arc<dyn Transport>,
    websocket_endpoint: String,
}

impl StreamingClient {
    /// Creates a client over an arbitrary transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            websocket_endpoint: WEBSOCKET_EVENTS_URL.to_string(),
        }
    }

    /// Creates a client backed by [`HttpTransport`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, StreamingError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport)).with_websocket_endpoint(config.websocket_url.clone()))
    }

    /// Sets the WebSocket events endpoint.
    pub fn with_websocket_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.websocket_endpoint = endpoint.into().trim_end().to_string();
        self
    }

    pub fn websocket_endpoint(&self) -> &str {
        &self.websocket_endpoint
    }

    /// Requests a new streaming session.
    pub async fn create_session(&self) -> Result<StreamSession, StreamingError> {
        let body = self.transport.post(SESSION_PATH).await?;
        let session = StreamSession::from_response(&body)?;
        debug!(event = "stream_session_created", url = %session.url());
        Ok(session)
    }

    /// Opens the chunked HTTP feed for `session`.
    ///
    /// The returned stream holds the connection until it ends, fails, is
    /// closed or is dropped. Events for symbols outside the request are
    /// dropped client-side even if the server sends them.
    pub async fn stream_quotes(
        &self,
        session: &StreamSession,
        request: &StreamRequest,
    ) -> Result<EventStream, StreamingError> {
        request.validate()?;
        let url = feed_url(session, request)?;

        let connection = self.transport.get_stream(&url).await?;
        debug!(
            event = "feed_opened",
            transport = "http",
            symbols = request.symbols.len(),
            line_break = request.line_break
        );

        Ok(EventStream::new(
            connection,
            Framing::from_line_break(request.line_break),
            &request.symbols,
            request.valid_only,
        ))
    }

    /// Opens the WebSocket feed for `session`.
    ///
    /// Each text frame carries whole messages, so frames are decoded as
    /// concatenated JSON regardless of `line_break`.
    pub async fn stream_quotes_websocket(
        &self,
        session: &StreamSession,
        request: &StreamRequest,
    ) -> Result<EventStream, StreamingError> {
        request.validate()?;
        let payload = serde_json::to_string(&request.subscription(session))
            .map_err(StreamingError::Encode)?;

        let connection = open_websocket(&self.websocket_endpoint, payload).await?;
        debug!(
            event = "feed_opened",
            transport = "websocket",
            symbols = request.symbols.len(),
            line_break = request.line_break
        );

        Ok(EventStream::new(
            connection,
            Framing::Concatenated,
            &request.symbols,
            request.valid_only,
        ))
    }
}

/// Parameters of an event feed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    symbols: Vec<String>,
    filter: Vec<EventKind>,
    line_break: bool,
    valid_only: bool,
    advanced_details: bool,
}

impl StreamRequest {
    /// Requests all event kinds for `symbols`, line-delimited, valid ticks
    /// only, without advanced details.
    ///
    /// Symbols are trimmed, upper-cased and de-duplicated; blank entries are
    /// dropped.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = symbol.as_ref().trim().to_ascii_uppercase();
            if !symbol.is_empty() && !normalized.contains(&symbol) {
                normalized.push(symbol);
            }
        }

        Self {
            symbols: normalized,
            filter: Vec::new(),
            line_break: true,
            valid_only: true,
            advanced_details: false,
        }
    }

    /// Restricts the feed to the given event kinds. Empty means all kinds.
    pub fn with_filter<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = EventKind>,
    {
        self.filter.clear();
        for kind in kinds {
            if !self.filter.contains(&kind) {
                self.filter.push(kind);
            }
        }
        self
    }

    pub fn with_line_break(mut self, line_break: bool) -> Self {
        self.line_break = line_break;
        self
    }

    pub fn with_valid_only(mut self, valid_only: bool) -> Self {
        self.valid_only = valid_only;
        self
    }

    pub fn with_advanced_details(mut self, advanced_details: bool) -> Self {
        self.advanced_details = advanced_details;
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn filter(&self) -> &[EventKind] {
        &self.filter
    }

    pub fn line_break(&self) -> bool {
        self.line_break
    }

    pub fn valid_only(&self) -> bool {
        self.valid_only
    }

    pub fn advanced_details(&self) -> bool {
        self.advanced_details
    }

    fn validate(&self) -> Result<(), StreamingError> {
        if self.symbols.is_empty() {
            return Err(StreamingError::InvalidRequest(
                "at least one symbol is required".to_string(),
            ));
        }
        if self.filter.contains(&EventKind::Unknown) {
            return Err(StreamingError::InvalidRequest(
                "filter may only contain quote, trade, summary, timesale or tradex".to_string(),
            ));
        }
        Ok(())
    }

    fn subscription(&self, session: &StreamSession) -> WebSocketSubscription {
        WebSocketSubscription {
            symbols: self.symbols.clone(),
            session_id: session.session_id().to_string(),
            filter: self.filter.clone(),
            line_break: self.line_break,
            valid_only: self.valid_only,
            advanced_details: self.advanced_details,
        }
    }
}

/// Builds the HTTP feed URL from the session endpoint and request options.
pub fn feed_url(session: &StreamSession, request: &StreamRequest) -> Result<Url, StreamingError> {
    let mut url = Url::parse(session.url()).map_err(|err| TransportError::InvalidUrl {
        url: session.url().to_string(),
        reason: err.to_string(),
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("sessionid", session.session_id());
        query.append_pair("symbols", &request.symbols.join(","));
        if !request.filter.is_empty() {
            let filter: Vec<&str> = request.filter.iter().map(EventKind::as_str).collect();
            query.append_pair("filter", &filter.join(","));
        }
        query.append_pair("linebreak", bool_param(request.line_break));
        query.append_pair("validOnly", bool_param(request.valid_only));
        query.append_pair("advancedDetails", bool_param(request.advanced_details));
    }

    Ok(url)
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Errors surfaced by [`StreamingClient`] and [`EventStream`].
#[derive(Debug, Error)]
pub enum StreamingError {
    /// Network, HTTP status or WebSocket failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Response or message did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Request rejected before anything was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Subscription payload could not be serialized.
    #[error("failed to encode subscription: {0}")]
    Encode(serde_json::Error),
}
