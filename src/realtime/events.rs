// Wire types for the realtime channel. Both directions are closed tagged
// unions so protocol drift fails at parse time instead of silently matching
// nothing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Notification};

/// Client -> server actions. Fire-and-forget; there is no per-action ack
/// beyond the echoed events below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundAction {
    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        receiver_id: i64,
        content: String,
        /// Client correlation token echoed nowhere; used locally to pair the
        /// optimistic entry with its ack timer.
        #[serde(skip_serializing_if = "Option::is_none")]
        client_ref: Option<Uuid>,
    },
    #[serde(rename = "edit_message", rename_all = "camelCase")]
    EditMessage { message_id: i64, content: String },
    #[serde(rename = "delete_message", rename_all = "camelCase")]
    DeleteMessage { message_id: i64 },
    #[serde(rename = "mark_messages_read", rename_all = "camelCase")]
    MarkMessagesRead { sender_id: i64 },
}

/// Server -> client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "receive_message")]
    ReceiveMessage {
        #[serde(flatten)]
        message: Message,
    },
    #[serde(rename = "message_updated")]
    MessageUpdated {
        #[serde(flatten)]
        message: Message,
    },
    #[serde(rename = "message_deleted", rename_all = "camelCase")]
    MessageDeleted { message_id: i64 },
    #[serde(rename = "user_status", rename_all = "camelCase")]
    UserStatus { user_id: i64, online: bool },
    #[serde(rename = "new_notification")]
    NewNotification {
        #[serde(flatten)]
        notification: Notification,
    },
    #[serde(rename = "error")]
    ServerError { message: String },
}

/// What subscribers actually observe: channel lifecycle plus events. The
/// channel never replays events missed while down, so `Connected` with
/// `reconnect == true` is the cue to re-sync via REST.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Connected { reconnect: bool },
    Disconnected,
    Event(InboundEvent),
}
