// Online/offline tracking per known user id, driven solely by user_status
// events. Presence is ephemeral: a reconnect may have missed transitions, so
// the whole map is dropped and rebuilt from incoming events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::realtime::events::{InboundEvent, SessionSignal};
use crate::realtime::RealtimeSession;

#[derive(Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<Mutex<HashMap<i64, bool>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        PresenceTracker::default()
    }

    /// Subscribe this tracker to a session's signals.
    pub fn attach(&self, session: &RealtimeSession) {
        let tracker = self.clone();
        session.on(move |signal| tracker.handle_signal(signal));
    }

    pub fn handle_signal(&self, signal: &SessionSignal) {
        match signal {
            SessionSignal::Connected { reconnect: true } => {
                if let Ok(mut map) = self.inner.lock() {
                    debug!("presence reset after reconnect ({} entries)", map.len());
                    map.clear();
                }
            }
            SessionSignal::Event(InboundEvent::UserStatus { user_id, online }) => {
                if let Ok(mut map) = self.inner.lock() {
                    map.insert(*user_id, *online);
                }
            }
            _ => {}
        }
    }

    /// Unknown users default to offline.
    pub fn is_online(&self, user_id: i64) -> bool {
        self.inner
            .lock()
            .map(|map| map.get(&user_id).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn online_users(&self) -> Vec<i64> {
        self.inner
            .lock()
            .map(|map| {
                let mut ids: Vec<i64> = map
                    .iter()
                    .filter(|(_, online)| **online)
                    .map(|(id, _)| *id)
                    .collect();
                ids.sort_unstable();
                ids
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(user_id: i64, online: bool) -> SessionSignal {
        SessionSignal::Event(InboundEvent::UserStatus { user_id, online })
    }

    #[test]
    fn transitions_follow_events() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.is_online(1));

        tracker.handle_signal(&status(1, true));
        assert!(tracker.is_online(1));

        tracker.handle_signal(&status(1, false));
        assert!(!tracker.is_online(1));

        tracker.handle_signal(&status(1, true));
        tracker.handle_signal(&status(2, true));
        assert_eq!(tracker.online_users(), vec![1, 2]);
    }

    #[test]
    fn reconnect_clears_all_entries() {
        let tracker = PresenceTracker::new();
        tracker.handle_signal(&status(1, true));
        tracker.handle_signal(&status(2, true));

        // Initial connect is not a reset; nothing was missed.
        tracker.handle_signal(&SessionSignal::Connected { reconnect: false });
        assert!(tracker.is_online(1));

        tracker.handle_signal(&SessionSignal::Connected { reconnect: true });
        assert!(!tracker.is_online(1));
        assert!(!tracker.is_online(2));
        assert!(tracker.online_users().is_empty());
    }
}
