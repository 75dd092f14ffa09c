//! Connection sessions.
//!
//! A session owns one client connection from admission to removal: it
//! registers the connection with the hub, runs both pumps, and removes the
//! connection exactly once when either pump stops.

use scribe_core::{ConnectionHandle, ConnectionIdentity, Hub, DEFAULT_OUTBOUND_CAPACITY};
use std::sync::Arc;
use tracing::{debug, info};

use crate::content::ContentHandler;
use crate::pump::{inbound_pump, outbound_pump, PumpConfig, PumpEnd};
use crate::traits::{SplitTransport, TransportError};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub pump: PumpConfig,
    /// Capacity of the connection's outbound queue.
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pump: PumpConfig::default(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Serve one connection until the client leaves or the connection fails.
///
/// Returns the reason the first pump stopped.
pub async fn serve<T>(
    transport: T,
    identity: ConnectionIdentity,
    hub: Hub,
    config: SessionConfig,
    handler: Arc<dyn ContentHandler>,
) -> PumpEnd
where
    T: SplitTransport,
{
    let (mut sink, mut stream) = transport.into_halves();
    let (handle, mut queue) = ConnectionHandle::new(identity.clone(), config.outbound_capacity);

    hub.admit(handle).await;

    let pump_config = config.pump.clone();
    let connection_id = identity.connection_id.clone();
    let mut writer = tokio::spawn(async move {
        outbound_pump(&mut sink, &mut queue, &connection_id, &pump_config).await
    });

    let (end, writer_done) = tokio::select! {
        end = inbound_pump(&mut stream, &identity, handler.as_ref(), &config.pump) => (end, false),
        joined = &mut writer => (writer_result(joined), true),
    };

    info!(
        connection = %identity.connection_id,
        user = %identity.user.username,
        document = %identity.document_id,
        reason = ?end,
        "Client disconnected"
    );

    hub.remove(&identity).await;

    // Removal closes the outbound queue; let the writer flush the LEAVE and close frame.
    if !writer_done {
        let flushed = writer_result(writer.await);
        debug!(connection = %identity.connection_id, writer = ?flushed, "Writer finished");
    }

    end
}

fn writer_result(joined: Result<PumpEnd, tokio::task::JoinError>) -> PumpEnd {
    joined.unwrap_or_else(|e| PumpEnd::Failed(TransportError::SendFailed(e.to_string())))
}
