// Session context: the authenticated identity every store is constructed
// with. There is deliberately no global token/user-id lookup; the context is
// cloned into each component.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SessionContext {
    base_url: String,
    ws_url: String,
    token: String,
    user_id: i64,
    signed_out: Arc<AtomicBool>,
}

impl SessionContext {
    /// Build a context from the REST base URL. The realtime endpoint defaults
    /// to the same host with an http->ws scheme swap and a `/socket` path;
    /// use [`with_ws_url`](Self::with_ws_url) to override.
    pub fn new(base_url: &str, token: &str, user_id: i64) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let ws_url = default_ws_url(&base_url);
        SessionContext {
            base_url,
            ws_url,
            token: token.to_string(),
            user_id,
            signed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_ws_url(mut self, ws_url: &str) -> Self {
        self.ws_url = ws_url.to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Flip the shared signed-out flag. Called on any REST 401; the embedding
    /// application watches this to route back to login.
    pub fn sign_out(&self) {
        self.signed_out.store(true, Ordering::SeqCst);
    }

    pub fn is_signed_out(&self) -> bool {
        self.signed_out.load(Ordering::SeqCst)
    }
}

fn default_ws_url(base_url: &str) -> String {
    let swapped = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!("{}/socket", swapped)
}
