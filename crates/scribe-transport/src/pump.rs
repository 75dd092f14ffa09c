//! Per-connection pumps.
//!
//! Every connection runs two loops concurrently:
//!
//! - the **inbound pump** reads frames until the client goes away, handing
//!   content frames to a [`ContentHandler`];
//! - the **outbound pump** drains the connection's outbound queue onto the
//!   transport and sends periodic pings.
//!
//! Any transport error ends the affected pump and only that connection.

use scribe_core::{ConnectionId, ConnectionIdentity, OutboundQueue};
use scribe_protocol::codec;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::content::ContentHandler;
use crate::traits::{FrameSink, FrameStream, InboundFrame, TransportError};

/// Pump timing configuration.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How often the outbound pump pings the client.
    pub ping_interval: Duration,
    /// How long the inbound pump waits for any frame, pongs included.
    pub pong_wait: Duration,
    /// Deadline for a single transport write.
    pub write_wait: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpEnd {
    /// The client closed the connection.
    PeerClosed,
    /// The hub closed the outbound queue.
    QueueClosed,
    /// Nothing was received within the read deadline.
    ReadTimeout,
    /// The transport failed.
    Failed(TransportError),
}

/// Read frames until the connection ends.
pub async fn inbound_pump<S>(
    stream: &mut S,
    identity: &ConnectionIdentity,
    handler: &dyn ContentHandler,
    config: &PumpConfig,
) -> PumpEnd
where
    S: FrameStream + ?Sized,
{
    loop {
        let frame = match timeout(config.pong_wait, stream.recv()).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                debug!(connection = %identity.connection_id, "Client closed connection");
                return PumpEnd::PeerClosed;
            }
            Ok(Err(e)) => {
                warn!(connection = %identity.connection_id, error = %e, "WebSocket error");
                return PumpEnd::Failed(e);
            }
            Err(_) => {
                debug!(connection = %identity.connection_id, "Read deadline exceeded");
                return PumpEnd::ReadTimeout;
            }
        };

        match frame {
            InboundFrame::Ping | InboundFrame::Pong => {
                trace!(connection = %identity.connection_id, "Keepalive");
            }
            content => handler.on_content(identity, content).await,
        }
    }
}

/// Drain the outbound queue onto the transport until the queue closes or a write fails.
///
/// Messages already waiting when one is received are coalesced into the
/// same text frame, newline-separated.
pub async fn outbound_pump<S>(
    sink: &mut S,
    queue: &mut OutboundQueue,
    connection_id: &ConnectionId,
    config: &PumpConfig,
) -> PumpEnd
where
    S: FrameSink + ?Sized,
{
    let period = config.ping_interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = queue.recv() => {
                let Some(first) = message else {
                    debug!(connection = %connection_id, "Outbound queue closed");
                    if let Err(e) = write(config.write_wait, sink.send_close()).await {
                        debug!(connection = %connection_id, error = %e, "Failed to send close frame");
                    }
                    return PumpEnd::QueueClosed;
                };

                let mut batch = vec![first];
                while let Ok(next) = queue.try_recv() {
                    batch.push(next);
                }

                let text = match codec::join_batch(&batch) {
                    Ok(text) => text,
                    Err(e) => return PumpEnd::Failed(e.into()),
                };
                trace!(connection = %connection_id, messages = batch.len(), bytes = text.len(), "Writing batch");

                if let Err(e) = write(config.write_wait, sink.send_text(text)).await {
                    debug!(connection = %connection_id, error = %e, "Write failed");
                    return PumpEnd::Failed(e);
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = write(config.write_wait, sink.send_ping()).await {
                    debug!(connection = %connection_id, error = %e, "Ping failed");
                    return PumpEnd::Failed(e);
                }
            }
        }
    }
}

async fn write<F>(deadline: Duration, send: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    timeout(deadline, send)
        .await
        .map_err(|_| TransportError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_transport, stalled_transport, Sent};
    use crate::traits::SplitTransport;
    use async_trait::async_trait;
    use bytes::Bytes;
    use scribe_core::{ConnectionHandle, DocumentId, UserInfo};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn identity() -> ConnectionIdentity {
        ConnectionIdentity::new(
            DocumentId::parse("doc1").unwrap(),
            UserInfo::new("u1", "ada", "ada@example.com"),
        )
    }

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<InboundFrame>>,
    }

    #[async_trait]
    impl ContentHandler for Recorder {
        async fn on_content(&self, _identity: &ConnectionIdentity, frame: InboundFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    #[tokio::test]
    async fn test_outbound_coalesces_queued_messages() {
        let (transport, mut remote) = fake_transport();
        let (mut sink, _stream) = transport.into_halves();
        let (handle, mut queue) = ConnectionHandle::new(identity(), 8);

        for message in ["a", "b", "c"] {
            handle.try_enqueue(Bytes::from(message)).unwrap();
        }
        drop(handle);

        let end = outbound_pump(&mut sink, &mut queue, &"conn".into(), &PumpConfig::default()).await;

        assert!(matches!(end, PumpEnd::QueueClosed));
        assert_eq!(
            remote.written(),
            vec![Sent::Text("a\nb\nc".into()), Sent::Close]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_pings_on_interval() {
        let (transport, mut remote) = fake_transport();
        let (mut sink, _stream) = transport.into_halves();
        let (handle, mut queue) = ConnectionHandle::new(identity(), 8);

        let pump = tokio::spawn(async move {
            outbound_pump(&mut sink, &mut queue, &"conn".into(), &PumpConfig::default()).await
        });

        tokio::time::sleep(Duration::from_secs(53)).await;
        assert!(remote.written().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(remote.written(), vec![Sent::Ping]);

        drop(handle);
        assert!(matches!(pump.await.unwrap(), PumpEnd::QueueClosed));
        assert_eq!(remote.written(), vec![Sent::Close]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_exits_when_ping_fails() {
        let (transport, remote) = fake_transport();
        let (mut sink, _stream) = transport.into_halves();
        let (_handle, mut queue) = ConnectionHandle::new(identity(), 8);
        remote.fail.store(true, Ordering::SeqCst);

        let end = outbound_pump(&mut sink, &mut queue, &"conn".into(), &PumpConfig::default()).await;

        assert!(matches!(end, PumpEnd::Failed(TransportError::SendFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_write_deadline() {
        let (transport, _remote) = stalled_transport();
        let (mut sink, _stream) = transport.into_halves();
        let (handle, mut queue) = ConnectionHandle::new(identity(), 8);
        handle.try_enqueue(Bytes::from_static(b"x")).unwrap();

        let started = Instant::now();
        let end = outbound_pump(&mut sink, &mut queue, &"conn".into(), &PumpConfig::default()).await;

        assert!(matches!(end, PumpEnd::Failed(TransportError::Timeout)));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_inbound_forwards_content_only() {
        let (transport, remote) = fake_transport();
        let (_sink, mut stream) = transport.into_halves();
        let recorder = Recorder::default();

        remote.frames.send(Ok(Some(InboundFrame::Text("hello".into())))).unwrap();
        remote.frames.send(Ok(Some(InboundFrame::Pong))).unwrap();
        remote.frames.send(Ok(Some(InboundFrame::Binary(Bytes::from_static(b"\x01\x02"))))).unwrap();
        remote.frames.send(Ok(None)).unwrap();

        let end = inbound_pump(&mut stream, &identity(), &recorder, &PumpConfig::default()).await;

        assert!(matches!(end, PumpEnd::PeerClosed));
        assert_eq!(
            *recorder.frames.lock().unwrap(),
            vec![
                InboundFrame::Text("hello".into()),
                InboundFrame::Binary(Bytes::from_static(b"\x01\x02")),
            ]
        );
    }

    #[tokio::test]
    async fn test_inbound_stops_on_error() {
        let (transport, remote) = fake_transport();
        let (_sink, mut stream) = transport.into_halves();

        remote.frames.send(Err(TransportError::ReceiveFailed("reset".into()))).unwrap();

        let end = inbound_pump(&mut stream, &identity(), &Recorder::default(), &PumpConfig::default()).await;
        assert!(matches!(end, PumpEnd::Failed(TransportError::ReceiveFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_read_deadline_reset_by_pong() {
        let (transport, remote) = fake_transport();
        let (_sink, mut stream) = transport.into_halves();
        let frames = remote.frames.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(50)).await;
            frames.send(Ok(Some(InboundFrame::Pong))).unwrap();
        });

        let started = Instant::now();
        let end = inbound_pump(&mut stream, &identity(), &Recorder::default(), &PumpConfig::default()).await;

        assert!(matches!(end, PumpEnd::ReadTimeout));
        assert!(started.elapsed() >= Duration::from_secs(110));
        assert!(started.elapsed() < Duration::from_secs(111));
    }
}
