// Error taxonomy for the sync engine.
// REST calls are never retried automatically; the transport reconnect loop
// is the only retry policy in the client.

use thiserror::Error;

/// Errors surfaced by the stores and the realtime channel
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing/expired token; the session context is flagged signed-out
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Fetch failed or the server answered outside 2xx
    #[error("network error: {0}")]
    Network(String),

    /// The server (or a client-side pre-check) rejected the payload
    #[error("invalid request: {0}")]
    Validation(String),

    /// Channel-level failure; never fatal to the session
    #[error("transport error: {0}")]
    Transport(String),

    /// An optimistic send could not be handed to the channel
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl SyncError {
    /// True when the caller should force a sign-out.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}
