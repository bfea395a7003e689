// Common test utilities for integration tests: logging setup, an in-memory
// Api backend with scriptable failures, and a recording action sink.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::LevelFilter;

use undercurrent::rest::{MessagePage, PageMeta};
use undercurrent::{
    Api, Contact, ConversationSummary, Message, Notification, NotificationKind, OutboundAction,
    Profile, SessionContext, SyncError,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn test_context() -> SessionContext {
    SessionContext::new("http://localhost:9999", "test-token", 1)
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

pub fn msg(id: i64, sender_id: i64, receiver_id: i64, content: &str, seconds: i64) -> Message {
    Message {
        id,
        sender_id,
        receiver_id,
        content: content.to_string(),
        created_at: at(seconds),
        is_read: false,
    }
}

pub fn notif(id: i64, kind: NotificationKind, from_user_id: i64, is_read: bool) -> Notification {
    Notification {
        id,
        kind,
        from_user_id,
        post_id: None,
        is_read,
        created_at: at(1_000 + id),
    }
}

pub fn summary(
    counterpart_id: i64,
    username: &str,
    last: &str,
    seconds: i64,
) -> ConversationSummary {
    ConversationSummary {
        counterpart_id,
        username: username.to_string(),
        avatar: None,
        last_message: last.to_string(),
        last_message_time: at(seconds),
        unread_count: 0,
    }
}

pub fn contact(id: i64, username: &str) -> Contact {
    Contact {
        id,
        username: username.to_string(),
        avatar: None,
    }
}

#[derive(Default)]
pub struct MockState {
    pub conversations: Vec<ConversationSummary>,
    // per-counterpart message log, any order; the mock serves pages
    // newest-first the way the real endpoint does
    pub messages: HashMap<i64, Vec<Message>>,
    pub followers: Vec<Contact>,
    pub following: Vec<Contact>,
    pub notifications: Vec<Notification>,
    pub unread_count: u32,
    pub profiles: HashMap<i64, Profile>,
    pub failing: HashSet<&'static str>,
    pub calls: Vec<&'static str>,
    pub fetch_delay: Option<Duration>,
}

/// In-memory stand-in for the REST backend. State mutations on success
/// mirror what the real server would do, so resync-after-failure tests see
/// genuine server truth.
#[derive(Default)]
pub struct MockApi {
    pub state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Self {
        MockApi::default()
    }

    pub fn with_state(configure: impl FnOnce(&mut MockState)) -> Self {
        let api = MockApi::new();
        configure(&mut api.state.lock().unwrap());
        api
    }

    pub fn fail_on(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.state.lock().unwrap().failing.remove(op);
    }

    pub fn calls_of(&self, op: &'static str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    fn begin(&self, op: &'static str) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op);
        if state.failing.contains(op) {
            return Err(SyncError::Network(format!("{}: injected failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Api for MockApi {
    async fn user_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError> {
        self.begin("user_conversations")?;
        Ok(self.state.lock().unwrap().conversations.clone())
    }

    async fn conversation_messages(
        &self,
        other_user_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, SyncError> {
        self.begin("conversation_messages")?;
        let delay = self.state.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        let mut all = state
            .messages
            .get(&other_user_id)
            .cloned()
            .unwrap_or_default();
        // newest first, ties broken by higher id first
        all.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = all.len() as u64;
        let pages = ((total + limit as u64 - 1) / limit as u64).max(1) as u32;
        let start = ((page - 1) * limit) as usize;
        let data: Vec<Message> = all.into_iter().skip(start).take(limit as usize).collect();

        Ok(MessagePage {
            data,
            pagination: PageMeta {
                page,
                pages,
                limit,
                total,
            },
        })
    }

    async fn user_followers(&self, _user_id: i64) -> Result<Vec<Contact>, SyncError> {
        self.begin("user_followers")?;
        Ok(self.state.lock().unwrap().followers.clone())
    }

    async fn user_following(&self, _user_id: i64) -> Result<Vec<Contact>, SyncError> {
        self.begin("user_following")?;
        Ok(self.state.lock().unwrap().following.clone())
    }

    async fn user_notifications(&self) -> Result<Vec<Notification>, SyncError> {
        self.begin("user_notifications")?;
        Ok(self.state.lock().unwrap().notifications.clone())
    }

    async fn unread_notification_count(&self) -> Result<u32, SyncError> {
        self.begin("unread_notification_count")?;
        Ok(self.state.lock().unwrap().unread_count)
    }

    async fn mark_notification_read(&self, id: i64) -> Result<(), SyncError> {
        self.begin("mark_notification_read")?;
        let mut state = self.state.lock().unwrap();
        if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id) {
            if !n.is_read {
                n.is_read = true;
                state.unread_count = state.unread_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        self.begin("mark_all_notifications_read")?;
        let mut state = self.state.lock().unwrap();
        for n in state.notifications.iter_mut() {
            n.is_read = true;
        }
        state.unread_count = 0;
        Ok(())
    }

    async fn delete_notification(&self, id: i64) -> Result<(), SyncError> {
        self.begin("delete_notification")?;
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.notifications.iter().position(|n| n.id == id) {
            let removed = state.notifications.remove(index);
            if !removed.is_read {
                state.unread_count = state.unread_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn delete_all_notifications(&self) -> Result<(), SyncError> {
        self.begin("delete_all_notifications")?;
        let mut state = self.state.lock().unwrap();
        state.notifications.clear();
        state.unread_count = 0;
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> Result<Profile, SyncError> {
        self.begin("profile")?;
        self.state
            .lock()
            .unwrap()
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| SyncError::Network(format!("no profile for user {}", user_id)))
    }

    async fn own_profile(&self) -> Result<Profile, SyncError> {
        self.begin("own_profile")?;
        self.state
            .lock()
            .unwrap()
            .profiles
            .get(&1)
            .cloned()
            .ok_or_else(|| SyncError::Network("no own profile".to_string()))
    }
}

/// Records outbound realtime actions instead of writing to a socket.
#[derive(Default)]
pub struct RecordingSink {
    pub actions: Mutex<Vec<OutboundAction>>,
    pub fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<OutboundAction> {
        self.actions.lock().unwrap().clone()
    }
}

impl undercurrent::ActionSink for RecordingSink {
    fn send_action(&self, action: OutboundAction) -> Result<(), SyncError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Transport(
                "recording sink set to fail".to_string(),
            ));
        }
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}
