//! # scribe-core
//!
//! The real-time presence hub of the Scribe collaborative editor.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - identity of a live client and the handle the hub uses to reach it
//! - **Room** - the set of connections viewing one document
//! - **Hub** - the single task that owns all rooms and emits JOIN/LEAVE events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  admit / remove   ┌─────────────┐     ┌──────────────┐
//! │  Session    │──────────────────▶│  Hub loop   │────▶│ RoomRegistry │
//! └─────────────┘   (one channel)   └─────────────┘     └──────────────┘
//!        ▲                                 │
//!        │      outbound queue (bounded)   │
//!        └─────────────────────────────────┘
//! ```
//!
//! The hub never blocks on a client: a full outbound queue gets its
//! connection dropped from the room.

mod command;
pub mod connection;
pub mod hub;
pub mod room;

pub use connection::{
    ConnectionHandle, ConnectionId, ConnectionIdentity, DocumentId, EnqueueError,
    InvalidDocumentId, OutboundQueue, DEFAULT_OUTBOUND_CAPACITY,
};
pub use hub::{Hub, HubConfig, HubStats};
pub use room::{Room, RoomRegistry};
pub use scribe_protocol::{PresenceEvent, PresenceKind, UserInfo};
