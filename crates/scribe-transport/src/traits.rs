//! Transport abstraction traits for Scribe.
//!
//! A live connection is used from two tasks at once: the inbound pump reads
//! while the outbound pump writes. Transports are therefore split into a
//! [`FrameSink`] and a [`FrameStream`] before the pumps start.

use async_trait::async_trait;
use bytes::Bytes;
use scribe_protocol::ProtocolError;
use thiserror::Error;

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text content.
    Text(String),
    /// Binary content.
    Binary(Bytes),
    /// Ping from the client.
    Ping,
    /// Answer to one of our pings.
    Pong,
}

impl InboundFrame {
    /// Whether the frame carries client content rather than keepalive traffic.
    #[must_use]
    pub fn is_content(&self) -> bool {
        matches!(self, InboundFrame::Text(_) | InboundFrame::Binary(_))
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            InboundFrame::Text(text) => text.len(),
            InboundFrame::Binary(data) => data.len(),
            InboundFrame::Ping | InboundFrame::Pong => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A read or write missed its deadline.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Outbound payload could not be framed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Writing half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame.
    async fn send_close(&mut self) -> Result<(), TransportError>;
}

/// Reading half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError>;
}

/// A connection that can be split into independently owned halves.
pub trait SplitTransport: Send {
    type Sink: FrameSink + 'static;
    type Stream: FrameStream;

    fn into_halves(self) -> (Self::Sink, Self::Stream);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_kinds() {
        assert!(InboundFrame::Text("hi".into()).is_content());
        assert!(InboundFrame::Binary(Bytes::from_static(b"\x01")).is_content());
        assert!(!InboundFrame::Pong.is_content());

        assert_eq!(InboundFrame::Text("hello".into()).len(), 5);
        assert!(InboundFrame::Ping.is_empty());
    }
}
