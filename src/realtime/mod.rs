// Realtime channel subsystem: one authenticated, auto-reconnecting
// bidirectional event stream per user session. This file holds the session
// handle; the connect/reconnect machinery lives in connection.rs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::context::SessionContext;
use crate::error::SyncError;

pub mod connection;
pub mod events;
pub mod presence;

pub use events::{InboundEvent, OutboundAction, SessionSignal};
pub use presence::PresenceTracker;

pub(crate) type Handler = Box<dyn FnMut(&SessionSignal) + Send>;

/// Outbound half of the channel as the stores see it. Production code hands
/// the stores a [`RealtimeSession`]; tests hand them a recording sink.
pub trait ActionSink: Send + Sync {
    fn send_action(&self, action: OutboundAction) -> Result<(), SyncError>;
}

impl ActionSink for RealtimeSession {
    fn send_action(&self, action: OutboundAction) -> Result<(), SyncError> {
        self.send(action)
    }
}

/// Cheap-to-clone handle to the realtime channel. All clones share the
/// driver task, the handler list and the connection flag.
#[derive(Clone)]
pub struct RealtimeSession {
    pub(crate) ctx: SessionContext,
    pub(crate) handlers: Arc<Mutex<Vec<Handler>>>,
    pub(crate) outbound_tx: mpsc::UnboundedSender<OutboundAction>,
    pub(crate) connected: Arc<AtomicBool>,
}

impl RealtimeSession {
    /// Register a signal handler. Handlers are invoked sequentially, in
    /// subscription order, from the driver task only; two handlers never
    /// run concurrently for the same session. A handler must not call
    /// `on()` itself.
    pub fn on<F>(&self, handler: F)
    where
        F: FnMut(&SessionSignal) + Send + 'static,
    {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(Box::new(handler));
        }
    }

    /// Fire-and-forget outbound action. Fails immediately when the channel
    /// is down; nothing is buffered or retried.
    pub fn send(&self, action: OutboundAction) -> Result<(), SyncError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::Transport(
                "realtime channel is down".to_string(),
            ));
        }
        self.outbound_tx
            .send(action)
            .map_err(|_| SyncError::Transport("realtime session closed".to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }
}
