use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::framing::DecodeError;

/// Server-issued streaming session.
///
/// Only produced by a successful session creation, so both fields are always
/// non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamSession {
    session_id: String,
    url: String,
}

impl StreamSession {
    /// Opaque session token passed as `sessionid` on the feed.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Feed endpoint the session was issued for.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Decodes a session-creation response body.
    pub fn from_response(body: &str) -> Result<Self, DecodeError> {
        let envelope: SessionEnvelope =
            serde_json::from_str(body).map_err(|source| DecodeError::json(source, body.as_bytes()))?;

        let session_id = envelope.stream.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(DecodeError::MissingField("stream.sessionid"));
        }
        let url = envelope.stream.url.trim().to_string();
        if url.is_empty() {
            return Err(DecodeError::MissingField("stream.url"));
        }

        Ok(Self { session_id, url })
    }
}

// The session id is a credential for the feed.
impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("session_id", &"[REDACTED]")
            .field("url", &self.url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(alias = "Stream")]
    stream: SessionBody,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(rename = "sessionid", alias = "sessionId", alias = "SessionId")]
    session_id: String,
    #[serde(alias = "Url")]
    url: String,
}

/// Event type carried in the `type` field of every feed message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Quote,
    Trade,
    Summary,
    Timesale,
    Tradex,
    /// Any type this crate does not know about yet.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Kinds that can be requested in a feed filter.
    pub const FILTERABLE: [EventKind; 5] = [
        Self::Quote,
        Self::Trade,
        Self::Summary,
        Self::Timesale,
        Self::Tradex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Trade => "trade",
            Self::Summary => "summary",
            Self::Timesale => "timesale",
            Self::Tradex => "tradex",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single market event from the feed.
///
/// Only `type` and `symbol` are fixed; every other field is kept verbatim
/// in `fields` and read through the typed accessors.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub symbol: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl StreamEvent {
    /// Raw payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Numeric field. The feed sends prices both as JSON numbers and as
    /// numeric strings.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Boolean field, accepting `true`/`false` strings.
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.fields.get(name)? {
            Value::Bool(value) => Some(*value),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Millisecond epoch timestamp field (`date`, `biddate`, `askdate`).
    pub fn timestamp_ms(&self, name: &str) -> Option<u64> {
        match self.fields.get(name)? {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bid(&self) -> Option<f64> {
        self.number("bid")
    }

    pub fn ask(&self) -> Option<f64> {
        self.number("ask")
    }

    /// Trade price, falling back to `last` for time-and-sales events.
    pub fn price(&self) -> Option<f64> {
        self.number("price").or_else(|| self.number("last"))
    }

    pub fn size(&self) -> Option<f64> {
        self.number("size")
    }

    /// False only when the payload carries an explicit `valid: false`.
    pub fn is_valid(&self) -> bool {
        self.flag("valid") != Some(false)
    }

    /// Time-and-sales tick that cancels an earlier print.
    pub fn is_cancel(&self) -> bool {
        self.flag("cancel") == Some(true)
    }

    /// Time-and-sales tick that corrects an earlier print.
    pub fn is_correction(&self) -> bool {
        self.flag("correction") == Some(true)
    }
}

/// Subscription payload sent as the first WebSocket frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketSubscription {
    pub symbols: Vec<String>,
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub filter: Vec<EventKind>,
    #[serde(rename = "linebreak")]
    pub line_break: bool,
    pub valid_only: bool,
    pub advanced_details: bool,
}
