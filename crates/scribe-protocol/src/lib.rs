//! # scribe-protocol
//!
//! Wire types for the Scribe presence hub.
//!
//! Every message the server pushes to a realtime client is a serialized
//! [`PresenceEvent`]. Events are encoded as JSON once per broadcast and
//! shared between all recipients; when several events are waiting for the
//! same client they are coalesced into one text frame, one event per line.
//!
//! ## Wire format
//!
//! ```text
//! {"type":"JOIN","document_id":"doc1","user":{"user_id":"u1","username":"ada","email":"ada@example.com"},"timestamp":"2024-05-01T12:00:00Z"}
//! ```
//!
//! ## Example
//!
//! ```rust
//! use scribe_protocol::{codec, PresenceEvent, UserInfo};
//!
//! let user = UserInfo::new("u1", "ada", "ada@example.com");
//! let event = PresenceEvent::join("doc1", user);
//!
//! let bytes = codec::encode(&event).unwrap();
//! let text = codec::join_batch(&[bytes.clone(), bytes]).unwrap();
//! assert_eq!(codec::decode_batch(&text).unwrap().len(), 2);
//! ```

pub mod codec;
pub mod event;

pub use codec::{decode, encode, ProtocolError};
pub use event::{PresenceEvent, PresenceKind, UserInfo};
