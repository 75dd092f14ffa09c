//! Connection identity and the hub-side connection handle.
//!
//! The hub never touches a transport. It holds a [`ConnectionHandle`]: the
//! identity of the connection plus the only sending half of its bounded
//! outbound queue. Dropping the handle closes the queue, which is the signal
//! for the outbound pump to write a close frame and stop.

use bytes::Bytes;
use scribe_protocol::UserInfo;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Maximum document id length.
pub const MAX_DOCUMENT_ID_LENGTH: usize = 256;

/// Default outbound queue capacity, in messages.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Reason a document id was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDocumentId {
    #[error("Document id cannot be empty")]
    Empty,

    #[error("Document id is {0} bytes, maximum is {MAX_DOCUMENT_ID_LENGTH}")]
    TooLong(usize),

    #[error("Document id contains control characters")]
    ControlCharacters,
}

/// Validate a document id.
///
/// # Errors
///
/// Returns the reason the id is not usable as a room key.
pub fn validate_document_id(id: &str) -> Result<(), InvalidDocumentId> {
    if id.is_empty() {
        return Err(InvalidDocumentId::Empty);
    }
    if id.len() > MAX_DOCUMENT_ID_LENGTH {
        return Err(InvalidDocumentId::TooLong(id.len()));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(InvalidDocumentId::ControlCharacters);
    }
    Ok(())
}

/// Identifier of a document, and therefore of its room.
///
/// Always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    /// Parse and validate a document id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, too long or contains control characters.
    pub fn parse(id: impl Into<String>) -> Result<Self, InvalidDocumentId> {
        let id = id.into();
        validate_document_id(&id)?;
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = InvalidDocumentId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who is connected, and to which document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub connection_id: ConnectionId,
    pub document_id: DocumentId,
    pub user: UserInfo,
}

impl ConnectionIdentity {
    /// Create an identity with a freshly generated connection id.
    #[must_use]
    pub fn new(document_id: DocumentId, user: UserInfo) -> Self {
        Self {
            connection_id: ConnectionId::generate(),
            document_id,
            user,
        }
    }
}

/// Receiving half of a connection's outbound queue, owned by its outbound pump.
pub type OutboundQueue = mpsc::Receiver<Bytes>;

/// Why a message could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The consumer is not keeping up.
    #[error("Outbound queue is full")]
    Full,

    /// The outbound pump has already stopped.
    #[error("Outbound queue is closed")]
    Closed,
}

/// The hub's reference to a live connection.
///
/// Not `Clone`: the handle owns the only sender of the outbound queue, so
/// dropping it is how the queue gets closed.
#[derive(Debug)]
pub struct ConnectionHandle {
    identity: ConnectionIdentity,
    outbound: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle and the outbound queue it feeds.
    #[must_use]
    pub fn new(identity: ConnectionIdentity, capacity: usize) -> (Self, OutboundQueue) {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        (Self { identity, outbound }, queue)
    }

    #[must_use]
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.identity.connection_id
    }

    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.identity.document_id
    }

    #[must_use]
    pub fn user(&self) -> &UserInfo {
        &self.identity.user
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if the queue is at capacity and
    /// [`EnqueueError::Closed`] if the outbound pump is gone.
    pub fn try_enqueue(&self, message: Bytes) -> Result<(), EnqueueError> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}
