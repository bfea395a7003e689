// Core data model shared by the REST layer, the realtime channel and the
// client-side stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A server-acknowledged direct message. Identity is the server-assigned
/// `id`; ordering within a conversation is `(created_at, id)` ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeliveryStatus {
    Sending = 1,   // optimistic entry, no server id yet
    Delivered = 2, // acknowledged by the server
    Failed = 3,    // transport rejected it or the ack window expired
}

/// One row of a conversation timeline. Confirmed entries carry the server
/// `id`; optimistic sends carry only the client correlation token until the
/// echoed `receive_message` (or a fetched page) reconciles them.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub id: Option<i64>,
    pub local_ref: Option<Uuid>,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub delivery: DeliveryStatus,
}

impl TimelineEntry {
    pub fn from_message(message: Message) -> Self {
        TimelineEntry {
            id: Some(message.id),
            local_ref: None,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            created_at: message.created_at,
            is_read: message.is_read,
            delivery: DeliveryStatus::Delivered,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_none() && self.delivery == DeliveryStatus::Sending
    }

    // Pending entries sort after confirmed entries with the same timestamp.
    pub fn sort_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id.unwrap_or(i64::MAX))
    }
}

/// Inbox row, derived from REST snapshots. Owned by the conversation list
/// aggregator and never mutated field-by-field on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub counterpart_id: i64,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    Comment,
    Like,
    Follow,
    NewPost,
    Favorite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from_user_id: i64,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Follower/following row for the contact tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Per-conversation pagination state. `page` is the oldest page loaded so
/// far and only ratchets upward; history is fetched strictly backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub total_pages: u32,
    pub page_size: u32,
}

impl PageCursor {
    pub fn has_older(&self) -> bool {
        self.page < self.total_pages
    }
}
