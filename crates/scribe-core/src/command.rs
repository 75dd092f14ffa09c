//! Commands accepted by the hub loop.
//!
//! Every request against the room registry travels as one of these over a
//! single channel, so all producers share one total order.

use crate::connection::{ConnectionHandle, ConnectionIdentity, DocumentId};
use crate::hub::HubStats;
use scribe_protocol::{PresenceEvent, UserInfo};
use tokio::sync::oneshot;

#[derive(Debug)]
pub(crate) enum Command {
    Admit(ConnectionHandle),
    Remove(ConnectionIdentity),
    Broadcast {
        document_id: DocumentId,
        event: PresenceEvent,
    },
    ActiveUsers {
        document_id: DocumentId,
        reply: oneshot::Sender<Vec<UserInfo>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Admit(_) => "admit",
            Command::Remove(_) => "remove",
            Command::Broadcast { .. } => "broadcast",
            Command::ActiveUsers { .. } => "active_users",
            Command::Stats { .. } => "stats",
        }
    }
}
