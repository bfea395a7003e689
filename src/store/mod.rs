// Client-side stores. Each store exclusively owns its collection, subscribes
// to the realtime channel via `attach`, and talks to the server through the
// `Api` trait so tests can drive it with an in-memory backend.

pub mod conversation;
pub mod inbox;
pub mod notifications;

pub use conversation::ConversationStore;
pub use inbox::ConversationList;
pub use notifications::NotificationStore;
