//! Rust SDK for Tradier market-data streaming.
//!
//! The crate is organized by transport surface:
//! - `config`: access token, environment selection and client defaults.
//! - `transport`: authenticated HTTP transport used for session creation and
//!   the chunked event feed.
//! - `stream`: session handles, event decoding and the lazy event stream.
//! - `retry`: bounded retry helpers for request/response calls.

/// Client configuration and environment loading.
pub mod config;
/// Retry helpers used by the HTTP transport.
pub mod retry;
/// Streaming session client, protocol types, framing and event stream.
pub mod stream;
/// Request transport seam and its reqwest implementation.
pub mod transport;

pub use config::{ClientConfig, Environment};
pub use stream::client::{StreamRequest, StreamingClient, StreamingError};
pub use stream::proto::{EventKind, StreamEvent, StreamSession};
pub use stream::session::{EventStream, StreamState};
