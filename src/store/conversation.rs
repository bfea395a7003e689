// Per-counterpart message timelines: pagination merge, optimistic send with
// a bounded ack window, push-event application and read receipts.
//
// The core invariant: after any mutation a timeline is sorted ascending by
// (created_at, id) and no two entries share a server id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::models::{DeliveryStatus, Message, PageCursor, TimelineEntry};
use crate::realtime::events::{InboundEvent, OutboundAction, SessionSignal};
use crate::realtime::{ActionSink, RealtimeSession};
use crate::rest::{Api, MessagePage};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// How long an optimistic send may stay unacknowledged before it is marked
/// failed. The server echoes every accepted send as a receive_message; a
/// send that never echoes would otherwise look pending forever.
pub const SEND_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Conversation {
    timeline: Vec<TimelineEntry>,
    cursor: Option<PageCursor>,
}

impl Conversation {
    /// Insert one server message, deduplicating by id and reconciling echoes
    /// of our own optimistic sends by (receiver, content).
    fn upsert_message(&mut self, message: Message, self_id: i64) {
        if self.timeline.iter().any(|e| e.id == Some(message.id)) {
            return;
        }
        if message.sender_id == self_id {
            if let Some(entry) = self.timeline.iter_mut().find(|e| {
                e.is_pending()
                    && e.receiver_id == message.receiver_id
                    && e.content == message.content
            }) {
                entry.id = Some(message.id);
                entry.created_at = message.created_at;
                entry.is_read = message.is_read;
                entry.delivery = DeliveryStatus::Delivered;
                return;
            }
        }
        self.timeline.push(TimelineEntry::from_message(message));
    }

    fn merge_page(&mut self, page: u32, fetched: &MessagePage, self_id: i64) {
        // The wire delivers newest-first; the timeline is ascending.
        let mut incoming = fetched.data.clone();
        incoming.reverse();

        if page == 1 {
            // Page 1 is authoritative for the span it covers: confirmed
            // entries inside the fetched (created_at, id) range are replaced
            // by the snapshot. Pending sends, older history and events newer
            // than the snapshot survive.
            if let (Some(oldest), Some(newest)) = (incoming.first(), incoming.last()) {
                let lo = (oldest.created_at, oldest.id);
                let hi = (newest.created_at, newest.id);
                self.timeline.retain(|e| match e.id {
                    None => true,
                    Some(id) => {
                        let key = (e.created_at, id);
                        key < lo || key > hi
                    }
                });
            }
        }
        for message in incoming {
            self.upsert_message(message, self_id);
        }

        let meta = fetched.pagination;
        let page_reached = self.cursor.map(|c| c.page).unwrap_or(0).max(meta.page);
        self.cursor = Some(PageCursor {
            page: page_reached,
            total_pages: meta.pages,
            page_size: meta.limit,
        });

        self.normalize();
    }

    fn normalize(&mut self) {
        self.timeline.sort_by_key(|e| e.sort_key());
    }
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<i64, Conversation>,
    loading: HashSet<i64>,
}

/// Cheap-to-clone handle; all clones share the same timelines.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<Inner>>,
    api: Arc<dyn Api>,
    sink: Arc<dyn ActionSink>,
    ctx: SessionContext,
}

impl ConversationStore {
    pub fn new(ctx: SessionContext, api: Arc<dyn Api>, sink: Arc<dyn ActionSink>) -> Self {
        ConversationStore {
            inner: Arc::new(Mutex::new(Inner::default())),
            api,
            sink,
            ctx,
        }
    }

    /// Subscribe this store to a session's signals.
    pub fn attach(&self, session: &RealtimeSession) {
        let store = self.clone();
        session.on(move |signal| store.handle_signal(signal));
    }

    /// Fetch one page of history for a counterpart and merge it in. Page 1
    /// refreshes the live tail; higher pages prepend older history.
    ///
    /// Calls for the same counterpart serialize through an in-flight guard:
    /// a duplicate while a fetch is outstanding is dropped and reports
    /// `Ok(false)`.
    pub async fn load_page(&self, counterpart_id: i64, page: u32) -> Result<bool, SyncError> {
        {
            let mut inner = self.lock();
            if !inner.loading.insert(counterpart_id) {
                debug!(
                    "page fetch for conversation {} already in flight, dropping",
                    counterpart_id
                );
                return Ok(false);
            }
        }

        let result = self
            .api
            .conversation_messages(counterpart_id, page, DEFAULT_PAGE_SIZE)
            .await;

        let mut inner = self.lock();
        inner.loading.remove(&counterpart_id);
        let fetched = result?;

        let self_id = self.ctx.user_id();
        inner
            .conversations
            .entry(counterpart_id)
            .or_default()
            .merge_page(page, &fetched, self_id);
        info!(
            "merged page {} ({} messages) into conversation {}",
            page,
            fetched.data.len(),
            counterpart_id
        );
        Ok(true)
    }

    /// Append an optimistic send and emit the real-time action. Returns the
    /// client correlation token. The entry stays `Sending` until the echoed
    /// receive_message reconciles it, and flips to `Failed` if the ack
    /// window expires first.
    pub fn send_optimistic(
        &self,
        counterpart_id: i64,
        content: &str,
    ) -> Result<Uuid, SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::Validation(
                "message content must not be empty".to_string(),
            ));
        }

        let local_ref = Uuid::new_v4();
        let entry = TimelineEntry {
            id: None,
            local_ref: Some(local_ref),
            sender_id: self.ctx.user_id(),
            receiver_id: counterpart_id,
            content: content.to_string(),
            created_at: Utc::now(),
            is_read: false,
            delivery: DeliveryStatus::Sending,
        };

        {
            let mut inner = self.lock();
            let conversation = inner.conversations.entry(counterpart_id).or_default();
            conversation.timeline.push(entry);
            conversation.normalize();
        }

        let action = OutboundAction::SendMessage {
            receiver_id: counterpart_id,
            content: content.to_string(),
            client_ref: Some(local_ref),
        };
        if let Err(e) = self.sink.send_action(action) {
            self.fail_pending(counterpart_id, local_ref);
            return Err(SyncError::Delivery(format!(
                "send_message could not be dispatched: {}",
                e
            )));
        }

        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SEND_ACK_TIMEOUT).await;
            store.expire_unacknowledged(counterpart_id, local_ref);
        });

        Ok(local_ref)
    }

    /// Flip is_read locally for every entry from the counterpart and fire
    /// the read receipt. At-least-once is fine here; the action is
    /// idempotent and there is no rollback.
    pub fn mark_read(&self, counterpart_id: i64) -> Result<(), SyncError> {
        {
            let mut inner = self.lock();
            if let Some(conversation) = inner.conversations.get_mut(&counterpart_id) {
                for entry in conversation
                    .timeline
                    .iter_mut()
                    .filter(|e| e.sender_id == counterpart_id)
                {
                    entry.is_read = true;
                }
            }
        }
        self.sink.send_action(OutboundAction::MarkMessagesRead {
            sender_id: counterpart_id,
        })
    }

    /// Optimistically rewrite a sent message; the echoed message_updated
    /// event converges every participant.
    pub fn edit(&self, message_id: i64, content: &str) -> Result<(), SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::Validation(
                "message content must not be empty".to_string(),
            ));
        }
        {
            let mut inner = self.lock();
            for conversation in inner.conversations.values_mut() {
                if let Some(entry) = conversation
                    .timeline
                    .iter_mut()
                    .find(|e| e.id == Some(message_id))
                {
                    entry.content = content.to_string();
                    break;
                }
            }
        }
        self.sink.send_action(OutboundAction::EditMessage {
            message_id,
            content: content.to_string(),
        })
    }

    /// Optimistically drop a message; the echoed message_deleted event is a
    /// no-op by then.
    pub fn delete(&self, message_id: i64) -> Result<(), SyncError> {
        self.remove_by_id(message_id);
        self.sink
            .send_action(OutboundAction::DeleteMessage { message_id })
    }

    pub fn handle_signal(&self, signal: &SessionSignal) {
        match signal {
            SessionSignal::Connected { reconnect: true } => {
                // Events missed while offline are gone; refresh the live
                // tail of every loaded conversation from REST.
                let loaded = self.loaded_conversations();
                info!(
                    "realtime channel back, refreshing {} conversation(s)",
                    loaded.len()
                );
                for counterpart_id in loaded {
                    let store = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = store.load_page(counterpart_id, 1).await {
                            warn!(
                                "post-reconnect refresh of conversation {} failed: {}",
                                counterpart_id, e
                            );
                        }
                    });
                }
            }
            SessionSignal::Event(InboundEvent::ReceiveMessage { message }) => {
                self.apply_incoming(message.clone());
            }
            SessionSignal::Event(InboundEvent::MessageUpdated { message }) => {
                self.apply_update(message);
            }
            SessionSignal::Event(InboundEvent::MessageDeleted { message_id }) => {
                self.remove_by_id(*message_id);
            }
            SessionSignal::Event(InboundEvent::ServerError { message }) => {
                warn!("realtime channel reported: {}", message);
            }
            _ => {}
        }
    }

    pub fn timeline(&self, counterpart_id: i64) -> Vec<TimelineEntry> {
        self.lock()
            .conversations
            .get(&counterpart_id)
            .map(|c| c.timeline.clone())
            .unwrap_or_default()
    }

    pub fn cursor(&self, counterpart_id: i64) -> Option<PageCursor> {
        self.lock()
            .conversations
            .get(&counterpart_id)
            .and_then(|c| c.cursor)
    }

    /// Whether older history remains to be paged in.
    pub fn has_older(&self, counterpart_id: i64) -> bool {
        self.cursor(counterpart_id)
            .map(|c| c.has_older())
            .unwrap_or(false)
    }

    pub fn loaded_conversations(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().conversations.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn apply_incoming(&self, message: Message) {
        let self_id = self.ctx.user_id();
        let counterpart_id = if message.sender_id == self_id {
            message.receiver_id
        } else {
            message.sender_id
        };
        let mut inner = self.lock();
        let conversation = inner.conversations.entry(counterpart_id).or_default();
        conversation.upsert_message(message, self_id);
        conversation.normalize();
    }

    fn apply_update(&self, message: &Message) {
        let mut inner = self.lock();
        for conversation in inner.conversations.values_mut() {
            if let Some(entry) = conversation
                .timeline
                .iter_mut()
                .find(|e| e.id == Some(message.id))
            {
                // In-place replacement keeps the entry's position; the
                // timestamp never changes on edit.
                entry.content = message.content.clone();
                entry.is_read = message.is_read;
                conversation.normalize();
                return;
            }
        }
        debug!("message_updated for unknown id {} ignored", message.id);
    }

    fn remove_by_id(&self, message_id: i64) {
        let mut inner = self.lock();
        for conversation in inner.conversations.values_mut() {
            let before = conversation.timeline.len();
            conversation.timeline.retain(|e| e.id != Some(message_id));
            if conversation.timeline.len() != before {
                return;
            }
        }
        debug!("message_deleted for unknown id {} ignored", message_id);
    }

    fn fail_pending(&self, counterpart_id: i64, local_ref: Uuid) {
        let mut inner = self.lock();
        if let Some(conversation) = inner.conversations.get_mut(&counterpart_id) {
            if let Some(entry) = conversation
                .timeline
                .iter_mut()
                .find(|e| e.local_ref == Some(local_ref))
            {
                entry.delivery = DeliveryStatus::Failed;
            }
        }
    }

    fn expire_unacknowledged(&self, counterpart_id: i64, local_ref: Uuid) {
        let mut inner = self.lock();
        if let Some(conversation) = inner.conversations.get_mut(&counterpart_id) {
            if let Some(entry) = conversation
                .timeline
                .iter_mut()
                .find(|e| e.local_ref == Some(local_ref) && e.is_pending())
            {
                warn!(
                    "send to {} unacknowledged after {:?}, marking failed",
                    counterpart_id, SEND_ACK_TIMEOUT
                );
                entry.delivery = DeliveryStatus::Failed;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
