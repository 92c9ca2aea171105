//! Friendship notifications pushed through the hub by the friendship handlers.

use serde_json::{json, Value};

use crate::connection::UserId;
use crate::ws_registry::Hub;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendEvent {
    /// Someone sent this user a request; `pending` is their open request count.
    RequestReceived { pending: u64 },
    /// This user's request was accepted by `username`.
    RequestAccepted { username: String },
    /// The user's request lists changed (accept, reject, cancel).
    RequestUpdate { pending: u64 },
    Removed,
}

impl FriendEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FriendEvent::RequestReceived { .. } => "friend_request_received",
            FriendEvent::RequestAccepted { .. } => "friend_request_accepted",
            FriendEvent::RequestUpdate { .. } => "friend_request_update",
            FriendEvent::Removed => "friend_removed",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            FriendEvent::RequestReceived { pending } | FriendEvent::RequestUpdate { pending } => {
                json!({ "count": pending })
            }
            FriendEvent::RequestAccepted { username } => json!({ "username": username }),
            FriendEvent::Removed => json!({ "message": "Friendship removed" }),
        }
    }
}

pub fn notify(hub: &Hub, user_id: UserId, event: &FriendEvent) {
    hub.send_to_user(user_id, event.kind(), event.payload());
}

/// Both sides of a removed friendship get the same event.
pub fn notify_removed(hub: &Hub, user_id: UserId, other_user_id: UserId) {
    let event = FriendEvent::Removed;
    hub.send_to_users(&[user_id, other_user_id], event.kind(), event.payload());
}
