// Notification feed with optimistic mutations. Every mutating operation
// applies locally first and, when the confirming REST call fails, falls back
// to a full resync. The counter and the feed may be briefly optimistic but
// never permanently diverge from server truth.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::models::Notification;
use crate::realtime::events::{InboundEvent, SessionSignal};
use crate::realtime::RealtimeSession;
use crate::rest::Api;

pub const UNREAD_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How long a pushed notification keeps its "fresh" highlight tag.
pub const FRESH_WINDOW: Duration = Duration::from_secs(3);

type AttentionSignal = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct Inner {
    feed: Vec<Notification>,
    unread: u32,
    panel_open: bool,
    fresh: HashSet<i64>,
    // user id -> avatar URL; an entry (even a None) means "fetched, never
    // fetch again".
    avatars: HashMap<i64, Option<String>>,
    avatar_pending: HashSet<i64>,
    last_error: Option<String>,
}

#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<Mutex<Inner>>,
    api: Arc<dyn Api>,
    ctx: SessionContext,
    attention: Option<AttentionSignal>,
}

impl NotificationStore {
    pub fn new(ctx: SessionContext, api: Arc<dyn Api>) -> Self {
        NotificationStore {
            inner: Arc::new(Mutex::new(Inner::default())),
            api,
            ctx,
            attention: None,
        }
    }

    /// Install the side-effect fired on every pushed notification (sound,
    /// badge bounce, whatever the embedder wants).
    pub fn with_attention_signal<F>(mut self, signal: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.attention = Some(Arc::new(signal));
        self
    }

    pub fn attach(&self, session: &RealtimeSession) {
        let store = self.clone();
        session.on(move |signal| store.handle_signal(signal));
    }

    /// Replace the feed with a fresh server snapshot and recompute the
    /// unread counter from it.
    pub async fn fetch_all(&self) -> Result<(), SyncError> {
        match self.api.user_notifications().await {
            Ok(feed) => {
                let senders: HashSet<i64> = feed.iter().map(|n| n.from_user_id).collect();
                {
                    let mut inner = self.lock();
                    inner.unread = feed.iter().filter(|n| !n.is_read).count() as u32;
                    inner.feed = feed;
                }
                for user_id in senders {
                    self.spawn_avatar_backfill(user_id);
                }
                Ok(())
            }
            Err(e) => {
                self.lock().last_error = Some(format!("notification fetch failed: {}", e));
                Err(e)
            }
        }
    }

    /// Cheap unread poll; deliberately independent of `fetch_all` so the
    /// badge works before the panel was ever opened.
    pub async fn fetch_unread_count(&self) -> Result<u32, SyncError> {
        let count = self.api.unread_notification_count().await?;
        self.lock().unread = count;
        Ok(count)
    }

    /// Drive `fetch_unread_count` on an interval until the session signs
    /// out.
    pub fn spawn_unread_poll(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if store.ctx.is_signed_out() {
                    break;
                }
                if let Err(e) = store.fetch_unread_count().await {
                    warn!("unread poll failed: {}", e);
                }
            }
        })
    }

    pub async fn mark_read(&self, id: i64) -> Result<(), SyncError> {
        {
            let mut inner = self.lock();
            if let Some(n) = inner.feed.iter_mut().find(|n| n.id == id && !n.is_read) {
                n.is_read = true;
                inner.unread = inner.unread.saturating_sub(1);
            }
        }
        if let Err(e) = self.api.mark_notification_read(id).await {
            self.resync_after("mark as read", &e).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), SyncError> {
        {
            let mut inner = self.lock();
            for n in inner.feed.iter_mut() {
                n.is_read = true;
            }
            inner.unread = 0;
        }
        if let Err(e) = self.api.mark_all_notifications_read().await {
            self.resync_after("mark all as read", &e).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn remove(&self, id: i64) -> Result<(), SyncError> {
        {
            let mut inner = self.lock();
            if let Some(index) = inner.feed.iter().position(|n| n.id == id) {
                let removed = inner.feed.remove(index);
                if !removed.is_read {
                    inner.unread = inner.unread.saturating_sub(1);
                }
            }
        }
        if let Err(e) = self.api.delete_notification(id).await {
            self.resync_after("delete", &e).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<(), SyncError> {
        {
            let mut inner = self.lock();
            inner.feed.clear();
            inner.unread = 0;
        }
        if let Err(e) = self.api.delete_all_notifications().await {
            self.resync_after("clear", &e).await;
            return Err(e);
        }
        Ok(())
    }

    pub fn handle_signal(&self, signal: &SessionSignal) {
        match signal {
            SessionSignal::Connected { reconnect: true } => {
                let store = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.fetch_all().await {
                        warn!("post-reconnect notification resync failed: {}", e);
                    }
                    if let Err(e) = store.fetch_unread_count().await {
                        warn!("post-reconnect unread resync failed: {}", e);
                    }
                });
            }
            SessionSignal::Event(InboundEvent::NewNotification { notification }) => {
                self.apply_push(notification);
            }
            SessionSignal::Event(InboundEvent::ServerError { message }) => {
                self.lock().last_error = Some(message.clone());
            }
            _ => {}
        }
    }

    fn apply_push(&self, notification: &Notification) {
        let panel_open = {
            let mut inner = self.lock();
            // The counter moves regardless of whether the panel is open;
            // the feed itself is only refreshed when somebody is looking.
            inner.unread += 1;
            inner.fresh.insert(notification.id);
            inner.panel_open
        };
        info!(
            "notification {} ({:?}) pushed, unread now {}",
            notification.id,
            notification.kind,
            self.unread_count()
        );

        if let Some(attention) = &self.attention {
            attention(notification);
        }

        let store = self.clone();
        let id = notification.id;
        tokio::spawn(async move {
            tokio::time::sleep(FRESH_WINDOW).await;
            store.lock().fresh.remove(&id);
        });

        self.spawn_avatar_backfill(notification.from_user_id);

        if panel_open {
            let store = self.clone();
            tokio::spawn(async move {
                if let Err(e) = store.fetch_all().await {
                    warn!("feed refresh after push failed: {}", e);
                }
            });
        }
    }

    /// Mark the feed panel open/closed. Open panels refetch on every push.
    pub fn set_panel_open(&self, open: bool) {
        self.lock().panel_open = open;
    }

    pub fn feed(&self) -> Vec<Notification> {
        self.lock().feed.clone()
    }

    pub fn unread_count(&self) -> u32 {
        self.lock().unread
    }

    /// Whether the id is still inside its highlight window.
    pub fn is_fresh(&self, id: i64) -> bool {
        self.lock().fresh.contains(&id)
    }

    pub fn avatar(&self, user_id: i64) -> Option<String> {
        self.lock().avatars.get(&user_id).cloned().flatten()
    }

    /// Pop the pending user-visible error, if any.
    pub fn take_error(&self) -> Option<String> {
        self.lock().last_error.take()
    }

    async fn resync_after(&self, op: &str, error: &SyncError) {
        warn!("{} failed ({}), resyncing notification feed", op, error);
        self.lock().last_error = Some(format!("could not {}: {}", op, error));
        if let Err(e) = self.fetch_all().await {
            warn!("resync after failed {} also failed: {}", op, e);
        }
    }

    fn spawn_avatar_backfill(&self, user_id: i64) {
        {
            let mut inner = self.lock();
            if inner.avatars.contains_key(&user_id) || !inner.avatar_pending.insert(user_id) {
                return;
            }
        }
        let store = self.clone();
        tokio::spawn(async move {
            let result = store.api.profile(user_id).await;
            let mut inner = store.lock();
            inner.avatar_pending.remove(&user_id);
            match result {
                Ok(profile) => {
                    inner.avatars.insert(user_id, profile.avatar);
                }
                Err(e) => debug!("avatar backfill for user {} failed: {}", user_id, e),
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
