//! # scribe-transport
//!
//! Moves presence events between the hub and live clients.
//!
//! - **Transport traits** - [`FrameSink`] and [`FrameStream`], the two halves of a connection
//! - **WebSocket** - adapters for axum's websocket
//! - **Pumps** - the per-connection inbound and outbound loops
//! - **Session** - admits a connection, runs both pumps, removes it when either ends
//!
//! ```rust,ignore
//! use scribe_transport::{serve, LoggingContentHandler, SessionConfig};
//!
//! ws.on_upgrade(move |socket| async move {
//!     serve(socket, identity, hub, SessionConfig::default(), Arc::new(LoggingContentHandler)).await;
//! })
//! ```

pub mod content;
pub mod pump;
pub mod session;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use content::{ContentHandler, LoggingContentHandler};
pub use pump::{inbound_pump, outbound_pump, PumpConfig, PumpEnd};
pub use session::{serve, SessionConfig};
pub use traits::{FrameSink, FrameStream, InboundFrame, SplitTransport, TransportError};
