//! Streaming modules.
//!
//! - `client`: session creation and feed requests over HTTP or WebSocket.
//! - `proto`: session envelope, event and subscription wire types.
//! - `framing`: incremental decoding of line-delimited or concatenated JSON.
//! - `session`: the lazy event stream that owns the feed connection.

/// Session creation and feed requests.
pub mod client;
/// Byte-to-event framing decoder.
pub mod framing;
/// Stream protocol messages.
pub mod proto;
/// Lazy event stream with connection ownership and client-side filtering.
pub mod session;
/// WebSocket feed connector.
pub mod websocket;
