//! Lazy event stream bound to one feed connection.
//!
//! [`EventStream`] owns the transport's byte stream, decodes it with the
//! requested framing and enforces the symbol and validity filters on the
//! client side. The connection is released exactly once: when the feed ends,
//! when it fails, on [`EventStream::close`], or when the stream is dropped.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{FusedStream, Stream};
use tracing::{debug, warn};

use crate::stream::client::StreamingError;
use crate::stream::framing::{DecodeResult, EventDecoder, Framing};
use crate::stream::proto::StreamEvent;
use crate::transport::ByteStream;

/// Lifecycle of an [`EventStream`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    /// Connection open, nothing received yet.
    Connected,
    /// At least one chunk has been received.
    Streaming,
    /// Feed ended or was closed by the consumer.
    Closed,
    /// Feed was terminated by a transport error.
    Failed,
}

/// Lazy, non-restartable sequence of market events.
///
/// Yields `Ok(event)` for every admitted event, `Err(StreamingError::Decode)`
/// for a malformed message (the stream continues), and a single
/// `Err(StreamingError::Transport)` before ending when the connection fails.
pub struct EventStream {
    connection: Option<ByteStream>,
    decoder: EventDecoder,
    symbols: HashSet<String>,
    valid_only: bool,
    pending: VecDeque<Result<StreamEvent, StreamingError>>,
    state: StreamState,
    admitted: u64,
    skipped: u64,
}

impl EventStream {
    /// Wraps an open connection.
    ///
    /// `symbols` is the requested symbol set; events for any other symbol
    /// are dropped. Matching ignores ASCII case.
    pub fn new<I, S>(connection: ByteStream, framing: Framing, symbols: I, valid_only: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            connection: Some(connection),
            decoder: EventDecoder::new(framing),
            symbols: symbols
                .into_iter()
                .map(|symbol| symbol.as_ref().trim().to_ascii_uppercase())
                .collect(),
            valid_only,
            pending: VecDeque::new(),
            state: StreamState::Connected,
            admitted: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the underlying connection is still held.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Number of events yielded so far.
    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    /// Number of decoded events dropped by the symbol or validity filter.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Stops consumption and releases the connection. Already decoded but
    /// unread events are discarded.
    pub fn close(&mut self) {
        self.pending.clear();
        self.release(StreamState::Closed);
    }

    fn release(&mut self, state: StreamState) {
        if self.connection.take().is_some() {
            debug!(
                event = "feed_released",
                state = ?state,
                admitted = self.admitted,
                skipped = self.skipped
            );
        }
        if !matches!(self.state, StreamState::Closed | StreamState::Failed) {
            self.state = state;
        }
    }

    fn admit(&mut self, result: DecodeResult) {
        match result {
            Ok(event) => {
                let wanted = self.symbols.contains(&event.symbol.to_ascii_uppercase());
                if !wanted || (self.valid_only && !event.is_valid()) {
                    self.skipped += 1;
                    debug!(
                        event = "feed_event_skipped",
                        symbol = %event.symbol,
                        kind = %event.kind,
                        requested = wanted
                    );
                    return;
                }
                self.admitted += 1;
                self.pending.push_back(Ok(event));
            }
            Err(err) => {
                warn!(event = "feed_decode_failed", error = %err);
                self.pending.push_back(Err(StreamingError::Decode(err)));
            }
        }
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, StreamingError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }

            let Some(connection) = this.connection.as_mut() else {
                return Poll::Ready(None);
            };

            match connection.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    this.state = StreamState::Streaming;
                    for result in this.decoder.push(&chunk) {
                        this.admit(result);
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.release(StreamState::Failed);
                    return Poll::Ready(Some(Err(StreamingError::Transport(err))));
                }
                Poll::Ready(None) => {
                    if let Some(result) = this.decoder.finish() {
                        this.admit(result);
                    }
                    this.release(StreamState::Closed);
                }
            }
        }
    }
}

impl FusedStream for EventStream {
    fn is_terminated(&self) -> bool {
        self.connection.is_none() && self.pending.is_empty()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("state", &self.state)
            .field("framing", &self.decoder.framing())
            .field("symbols", &self.symbols)
            .field("valid_only", &self.valid_only)
            .field("admitted", &self.admitted)
            .field("skipped", &self.skipped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use futures_util::{Stream, StreamExt};

    use super::{EventStream, StreamState};
    use crate::stream::client::StreamingError;
    use crate::stream::framing::Framing;
    use crate::transport::{ByteStream, TransportError};

    struct ReleaseProbe(Arc<AtomicUsize>);

    impl Drop for ReleaseProbe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ProbedConnection {
        chunks: VecDeque<Result<Vec<u8>, TransportError>>,
        _probe: ReleaseProbe,
    }

    impl Stream for ProbedConnection {
        type Item = Result<Vec<u8>, TransportError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.get_mut().chunks.pop_front())
        }
    }

    fn probed(
        chunks: Vec<Result<Vec<u8>, TransportError>>,
        releases: &Arc<AtomicUsize>,
    ) -> ByteStream {
        Box::pin(ProbedConnection {
            chunks: chunks.into(),
            _probe: ReleaseProbe(Arc::clone(releases)),
        })
    }

    fn line(kind: &str, symbol: &str) -> Vec<u8> {
        format!("{{\"type\":\"{kind}\",\"symbol\":\"{symbol}\"}}\n").into_bytes()
    }

    #[tokio::test]
    async fn filters_symbols_outside_request() {
        let releases = Arc::new(AtomicUsize::new(0));
        let chunks = vec![
            Ok(line("quote", "AAPL")),
            Ok(line("quote", "MSFT")),
            Ok(line("quote", "GOOG")),
        ];
        let stream = EventStream::new(
            probed(chunks, &releases),
            Framing::LineDelimited,
            ["aapl", "MSFT"],
            true,
        );

        let events: Vec<_> = stream.collect().await;
        let symbols: Vec<String> = events
            .into_iter()
            .map(|item| item.expect("event").symbol)
            .collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn early_drop_releases_connection_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let chunks = (0..10).map(|_| Ok(line("trade", "AAPL"))).collect();
        let mut stream = EventStream::new(
            probed(chunks, &releases),
            Framing::LineDelimited,
            ["AAPL"],
            true,
        );

        let first = stream.next().await.expect("item").expect("event");
        assert_eq!(first.symbol, "AAPL");
        assert_eq!(stream.state(), StreamState::Streaming);
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        drop(stream);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_releases_once_and_ends_stream() {
        let releases = Arc::new(AtomicUsize::new(0));
        let chunks = vec![Ok([line("quote", "AAPL"), line("quote", "AAPL")].concat())];
        let mut stream = EventStream::new(
            probed(chunks, &releases),
            Framing::LineDelimited,
            ["AAPL"],
            true,
        );

        assert!(stream.next().await.is_some());
        stream.close();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(!stream.is_connected());
        assert!(stream.next().await.is_none());

        drop(stream);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_fails_stream_after_one_item() {
        let releases = Arc::new(AtomicUsize::new(0));
        let chunks = vec![
            Ok(line("quote", "AAPL")),
            Err(TransportError::InvalidUrl {
                url: "x".to_string(),
                reason: "simulated".to_string(),
            }),
            Ok(line("quote", "AAPL")),
        ];
        let mut stream = EventStream::new(
            probed(chunks, &releases),
            Framing::LineDelimited,
            ["AAPL"],
            true,
        );

        assert!(stream.next().await.expect("first").is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(StreamingError::Transport(_)))
        ));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_messages_surface_and_stream_continues() {
        let releases = Arc::new(AtomicUsize::new(0));
        let chunks = vec![Ok(b"{broken\n".to_vec()), Ok(line("quote", "AAPL"))];
        let stream = EventStream::new(
            probed(chunks, &releases),
            Framing::LineDelimited,
            ["AAPL"],
            true,
        );

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(StreamingError::Decode(_))));
        assert_eq!(items[1].as_ref().expect("event").symbol, "AAPL");
    }

    #[tokio::test]
    async fn valid_only_drops_ticks_flagged_invalid() {
        let releases = Arc::new(AtomicUsize::new(0));
        let timesales = || {
            vec![Ok(b"{\"type\":\"trade\",\"symbol\":\"AAPL\",\"valid\":false}\n\
                      {\"type\":\"trade\",\"symbol\":\"AAPL\",\"valid\":true}\n"
                .to_vec())]
        };

        let mut stream = EventStream::new(
            probed(timesales(), &releases),
            Framing::LineDelimited,
            ["AAPL"],
            true,
        );
        let mut admitted = 0;
        while let Some(item) = stream.next().await {
            assert!(item.expect("event").is_valid());
            admitted += 1;
        }
        assert_eq!(admitted, 1);
        assert_eq!(stream.skipped(), 1);

        let everything = EventStream::new(
            probed(timesales(), &releases),
            Framing::LineDelimited,
            ["AAPL"],
            false,
        );
        assert_eq!(everything.count().await, 2);
    }

    #[tokio::test]
    async fn valid_only_keeps_corrections_and_cancels() {
        let releases = Arc::new(AtomicUsize::new(0));
        let chunks = vec![Ok(b"{\"type\":\"timesale\",\"symbol\":\"AAPL\",\"last\":\"10.0\",\"correction\":true,\"cancel\":false}\n\
                               {\"type\":\"timesale\",\"symbol\":\"AAPL\",\"last\":\"10.0\",\"cancel\":true}\n"
            .to_vec())];
        let stream = EventStream::new(
            probed(chunks, &releases),
            Framing::LineDelimited,
            ["AAPL"],
            true,
        );

        let events: Vec<_> = stream
            .map(|item| item.expect("event"))
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_correction());
        assert!(events[1].is_cancel());
    }

    #[tokio::test]
    async fn concatenated_framing_flushes_at_end() {
        let releases = Arc::new(AtomicUsize::new(0));
        let chunks = vec![
            Ok(b"{\"type\":\"quote\",\"symbol\":\"AAPL\"}{\"type\":\"qu".to_vec()),
            Ok(b"ote\",\"symbol\":\"AAPL\"}".to_vec()),
        ];
        let stream = EventStream::new(
            probed(chunks, &releases),
            Framing::Concatenated,
            ["AAPL"],
            true,
        );
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(Result::is_ok));
    }
}
