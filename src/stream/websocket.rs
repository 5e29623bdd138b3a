use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::transport::{ByteStream, TransportError};

/// Connects to the WebSocket events endpoint, sends the subscription payload
/// and returns text and binary frames as a chunk stream.
///
/// Control frames are dropped; a close frame ends the stream. Dropping the
/// returned stream drops the socket.
pub(crate) async fn open_websocket(
    endpoint: &str,
    subscription: String,
) -> Result<ByteStream, TransportError> {
    let (mut socket, response) = connect_async(endpoint).await?;
    debug!(
        event = "websocket_connected",
        status = response.status().as_u16()
    );

    socket.send(Message::Text(subscription)).await?;

    let frames = socket
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
                Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
                Ok(_) => None,
                Err(err) => Some(Err(TransportError::WebSocket(err))),
            })
        });

    Ok(Box::pin(frames))
}
