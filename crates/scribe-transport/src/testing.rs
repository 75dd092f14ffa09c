//! In-memory transport halves for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameStream, InboundFrame, SplitTransport, TransportError};

/// What a [`FakeSink`] was asked to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Ping,
    Close,
}

pub struct FakeSink {
    sent: mpsc::UnboundedSender<Sent>,
    fail: Arc<AtomicBool>,
    stall: bool,
}

impl FakeSink {
    async fn write(&mut self, frame: Sent) -> Result<(), TransportError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        self.sent
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write(Sent::Text(text)).await
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.write(Sent::Ping).await
    }

    async fn send_close(&mut self) -> Result<(), TransportError> {
        self.write(Sent::Close).await
    }
}

pub struct FakeStream {
    frames: mpsc::UnboundedReceiver<Result<Option<InboundFrame>, TransportError>>,
}

#[async_trait]
impl FrameStream for FakeStream {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        match self.frames.recv().await {
            Some(result) => result,
            None => Ok(None),
        }
    }
}

/// Test-side controls of a fake connection.
pub struct Remote {
    pub sent: mpsc::UnboundedReceiver<Sent>,
    pub frames: mpsc::UnboundedSender<Result<Option<InboundFrame>, TransportError>>,
    pub fail: Arc<AtomicBool>,
}

impl Remote {
    /// Everything written so far, without waiting.
    pub fn written(&mut self) -> Vec<Sent> {
        let mut out = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            out.push(frame);
        }
        out
    }

    /// Wait until the sink writes a close frame, returning everything written before it.
    pub async fn until_close(&mut self) -> Vec<Sent> {
        let mut out = Vec::new();
        while let Some(frame) = self.sent.recv().await {
            if frame == Sent::Close {
                return out;
            }
            out.push(frame);
        }
        out
    }
}

pub struct FakeTransport {
    sink: FakeSink,
    stream: FakeStream,
}

impl SplitTransport for FakeTransport {
    type Sink = FakeSink;
    type Stream = FakeStream;

    fn into_halves(self) -> (FakeSink, FakeStream) {
        (self.sink, self.stream)
    }
}

pub fn fake_transport() -> (FakeTransport, Remote) {
    fake_transport_with(false)
}

/// A transport whose writes never complete.
pub fn stalled_transport() -> (FakeTransport, Remote) {
    fake_transport_with(true)
}

fn fake_transport_with(stall: bool) -> (FakeTransport, Remote) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let fail = Arc::new(AtomicBool::new(false));

    let transport = FakeTransport {
        sink: FakeSink {
            sent: sent_tx,
            fail: fail.clone(),
            stall,
        },
        stream: FakeStream { frames: frames_rx },
    };
    let remote = Remote {
        sent: sent_rx,
        frames: frames_tx,
        fail,
    };
    (transport, remote)
}
