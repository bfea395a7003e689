// undercurrent: the real-time synchronization engine behind a social-feed
// client. Reconciles REST pagination, pushed events and optimistic local
// mutations into ordered, duplicate-free views of conversations and
// notifications.

pub mod context;
pub mod error;
pub mod models;
pub mod realtime;
pub mod rest;
pub mod store;

// Re-export the main types for convenience
pub use context::SessionContext;
pub use error::SyncError;
pub use models::*;
pub use realtime::{
    ActionSink, InboundEvent, OutboundAction, PresenceTracker, RealtimeSession, SessionSignal,
};
pub use rest::{Api, RestClient};
pub use store::{ConversationList, ConversationStore, NotificationStore};
