//! WebSocket transport implementation.
//!
//! Adapts axum's upgraded [`WebSocket`] to the [`FrameSink`] / [`FrameStream`]
//! halves driven by the pumps.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::traits::{FrameSink, FrameStream, InboundFrame, SplitTransport, TransportError};

/// Writing half of an axum websocket.
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

/// Reading half of an axum websocket.
pub struct WebSocketStream {
    inner: SplitStream<WebSocket>,
}

impl SplitTransport for WebSocket {
    type Sink = WebSocketSink;
    type Stream = WebSocketStream;

    fn into_halves(self) -> (WebSocketSink, WebSocketStream) {
        let (sink, stream) = self.split();
        (WebSocketSink { inner: sink }, WebSocketStream { inner: stream })
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.inner
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_close(&mut self) -> Result<(), TransportError> {
        self.inner
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl FrameStream for WebSocketStream {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        match self.inner.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(InboundFrame::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(InboundFrame::Binary(Bytes::from(data)))),
            Some(Ok(Message::Ping(_))) => Ok(Some(InboundFrame::Ping)),
            Some(Ok(Message::Pong(_))) => Ok(Some(InboundFrame::Pong)),
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame");
                Ok(None)
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}
