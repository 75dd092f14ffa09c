//! Client content frames.
//!
//! Clients may send text or binary frames. The hub does not synchronize
//! document content; frames are handed to a [`ContentHandler`], the place
//! where an edit-merging layer would plug in.

use async_trait::async_trait;
use scribe_core::ConnectionIdentity;
use tracing::debug;

use crate::traits::InboundFrame;

/// Receives content frames read by a connection's inbound pump.
#[async_trait]
pub trait ContentHandler: Send + Sync {
    /// Called once per content frame, in arrival order for that connection.
    async fn on_content(&self, identity: &ConnectionIdentity, frame: InboundFrame);
}

/// Logs content frames and otherwise discards them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingContentHandler;

#[async_trait]
impl ContentHandler for LoggingContentHandler {
    async fn on_content(&self, identity: &ConnectionIdentity, frame: InboundFrame) {
        match &frame {
            InboundFrame::Text(text) => debug!(
                connection = %identity.connection_id,
                document = %identity.document_id,
                user = %identity.user.username,
                "Received message: {}",
                text
            ),
            _ => debug!(
                connection = %identity.connection_id,
                document = %identity.document_id,
                user = %identity.user.username,
                bytes = frame.len(),
                "Received binary message"
            ),
        }
    }
}
