// Conversation list aggregator: the inbox view. Summaries are derived
// wholesale from REST snapshots; push events only schedule a refresh rather
// than patching rows in place, trading precision for simplicity.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::models::{Contact, ConversationSummary};
use crate::realtime::events::{InboundEvent, SessionSignal};
use crate::realtime::RealtimeSession;
use crate::rest::Api;

#[derive(Default)]
struct Inner {
    summaries: Vec<ConversationSummary>,
    contacts: Vec<Contact>,
    refreshing: bool,
    dirty: bool,
    last_error: Option<String>,
}

#[derive(Clone)]
pub struct ConversationList {
    inner: Arc<Mutex<Inner>>,
    api: Arc<dyn Api>,
    ctx: SessionContext,
}

impl ConversationList {
    pub fn new(ctx: SessionContext, api: Arc<dyn Api>) -> Self {
        ConversationList {
            inner: Arc::new(Mutex::new(Inner::default())),
            api,
            ctx,
        }
    }

    pub fn attach(&self, session: &RealtimeSession) {
        let list = self.clone();
        session.on(move |signal| list.handle_signal(signal));
    }

    /// Replace the summary set with a fresh server snapshot, newest
    /// conversation first.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        match self.api.user_conversations().await {
            Ok(mut summaries) => {
                summaries.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
                let mut inner = self.lock();
                inner.summaries = summaries;
                inner.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.lock().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Queue a refresh without stacking: while one snapshot fetch is in
    /// flight further requests collapse into a single follow-up pass.
    pub fn schedule_refresh(&self) {
        {
            let mut inner = self.lock();
            if inner.refreshing {
                inner.dirty = true;
                return;
            }
            inner.refreshing = true;
        }
        let list = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = list.refresh().await {
                    warn!("inbox refresh failed: {}", e);
                }
                let run_again = {
                    let mut inner = list.lock();
                    if inner.dirty {
                        inner.dirty = false;
                        true
                    } else {
                        inner.refreshing = false;
                        false
                    }
                };
                if !run_again {
                    break;
                }
            }
        });
    }

    /// Union of followers and following for the contact tab, deduplicated
    /// by user id and sorted by username.
    pub async fn load_contacts(&self) -> Result<(), SyncError> {
        let user_id = self.ctx.user_id();
        let mut contacts = self.api.user_followers(user_id).await?;
        for contact in self.api.user_following(user_id).await? {
            if !contacts.iter().any(|c| c.id == contact.id) {
                contacts.push(contact);
            }
        }
        contacts.sort_by(|a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()));
        self.lock().contacts = contacts;
        Ok(())
    }

    pub fn handle_signal(&self, signal: &SessionSignal) {
        match signal {
            SessionSignal::Connected { reconnect: true } => self.schedule_refresh(),
            SessionSignal::Event(
                InboundEvent::ReceiveMessage { .. }
                | InboundEvent::MessageUpdated { .. }
                | InboundEvent::MessageDeleted { .. },
            ) => {
                debug!("message traffic observed, scheduling inbox refresh");
                self.schedule_refresh();
            }
            _ => {}
        }
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.lock().summaries.clone()
    }

    /// Case-insensitive substring match over username and last message.
    /// Pure projection; the underlying set is untouched.
    pub fn filter(&self, query: &str) -> Vec<ConversationSummary> {
        let needle = query.to_lowercase();
        self.lock()
            .summaries
            .iter()
            .filter(|s| {
                s.username.to_lowercase().contains(&needle)
                    || s.last_message.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.lock().contacts.clone()
    }

    pub fn filter_contacts(&self, query: &str) -> Vec<Contact> {
        let needle = query.to_lowercase();
        self.lock()
            .contacts
            .iter()
            .filter(|c| c.username.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn total_unread(&self) -> u32 {
        self.lock().summaries.iter().map(|s| s.unread_count).sum()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
