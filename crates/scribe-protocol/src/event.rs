//! Presence event types.
//!
//! A presence event tells the members of a document room that a user
//! entered or left it. Events are immutable once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceKind {
    /// A user started viewing the document.
    #[serde(rename = "JOIN")]
    Join,
    /// A user stopped viewing the document.
    #[serde(rename = "LEAVE")]
    Leave,
}

impl PresenceKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceKind::Join => "JOIN",
            PresenceKind::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for PresenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public identity of a user, as shown to the other viewers of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    /// Stable user identifier.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Contact address.
    pub email: String,
}

impl UserInfo {
    /// Create a new user info record.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            email: email.into(),
        }
    }
}

/// A JOIN or LEAVE notification for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    #[serde(rename = "type")]
    kind: PresenceKind,
    document_id: String,
    user: UserInfo,
    timestamp: DateTime<Utc>,
}

impl PresenceEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(kind: PresenceKind, document_id: impl Into<String>, user: UserInfo) -> Self {
        Self::at(kind, document_id, user, Utc::now())
    }

    /// Create an event with an explicit timestamp.
    #[must_use]
    pub fn at(
        kind: PresenceKind,
        document_id: impl Into<String>,
        user: UserInfo,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            document_id: document_id.into(),
            user,
            timestamp,
        }
    }

    /// Create a JOIN event.
    #[must_use]
    pub fn join(document_id: impl Into<String>, user: UserInfo) -> Self {
        Self::new(PresenceKind::Join, document_id, user)
    }

    /// Create a LEAVE event.
    #[must_use]
    pub fn leave(document_id: impl Into<String>, user: UserInfo) -> Self {
        Self::new(PresenceKind::Leave, document_id, user)
    }

    #[must_use]
    pub fn kind(&self) -> PresenceKind {
        self.kind
    }

    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    #[must_use]
    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let event = PresenceEvent::at(
            PresenceKind::Join,
            "doc1",
            UserInfo::new("u1", "ada", "ada@example.com"),
            timestamp,
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "JOIN",
                "document_id": "doc1",
                "user": {
                    "user_id": "u1",
                    "username": "ada",
                    "email": "ada@example.com"
                },
                "timestamp": "2024-05-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(PresenceKind::Join.to_string(), "JOIN");
        assert_eq!(PresenceKind::Leave.as_str(), "LEAVE");
        assert_eq!(
            serde_json::from_str::<PresenceKind>("\"LEAVE\"").unwrap(),
            PresenceKind::Leave
        );
        assert!(serde_json::from_str::<PresenceKind>("\"join\"").is_err());
    }

    #[test]
    fn test_constructors() {
        let user = UserInfo::new("u2", "grace", "grace@example.com");
        let leave = PresenceEvent::leave("doc9", user.clone());

        assert_eq!(leave.kind(), PresenceKind::Leave);
        assert_eq!(leave.document_id(), "doc9");
        assert_eq!(leave.user(), &user);
    }
}
