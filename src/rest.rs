// REST layer: typed endpoints consumed by the stores. All authenticated
// calls carry the bearer token from the session context; a 401 flips the
// shared signed-out flag before surfacing as an auth error.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::models::{Contact, ConversationSummary, Message, Notification, Profile};

/// Page of conversation messages as served by
/// `GET /getConversationMessages/{otherUserId}`; `data` is newest-first.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePage {
    pub data: Vec<Message>,
    pub pagination: PageMeta,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageMeta {
    pub page: u32,
    pub pages: u32,
    pub limit: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct NotificationFeed {
    data: Vec<Notification>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCount {
    unread_count: u32,
}

/// The REST surface the stores are written against. Production code uses
/// [`RestClient`]; tests drive the stores with an in-memory implementation.
#[async_trait]
pub trait Api: Send + Sync {
    async fn user_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError>;
    async fn conversation_messages(
        &self,
        other_user_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, SyncError>;
    async fn user_followers(&self, user_id: i64) -> Result<Vec<Contact>, SyncError>;
    async fn user_following(&self, user_id: i64) -> Result<Vec<Contact>, SyncError>;
    async fn user_notifications(&self) -> Result<Vec<Notification>, SyncError>;
    async fn unread_notification_count(&self) -> Result<u32, SyncError>;
    async fn mark_notification_read(&self, id: i64) -> Result<(), SyncError>;
    async fn mark_all_notifications_read(&self) -> Result<(), SyncError>;
    async fn delete_notification(&self, id: i64) -> Result<(), SyncError>;
    async fn delete_all_notifications(&self) -> Result<(), SyncError>;
    async fn profile(&self, user_id: i64) -> Result<Profile, SyncError>;
    async fn own_profile(&self) -> Result<Profile, SyncError>;
}

/// reqwest-backed implementation of [`Api`].
#[derive(Clone)]
pub struct RestClient {
    ctx: SessionContext,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(ctx: SessionContext) -> Self {
        RestClient {
            ctx,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.ctx.base_url(), path)
    }

    /// Issue the request and map the status: 401 signs the session out,
    /// 400/422 surface as validation failures, any other non-2xx as a
    /// network error.
    async fn dispatch(&self, method: Method, path: &str) -> Result<reqwest::Response, SyncError> {
        let url = self.url(path);
        debug!("REST {} {}", method, url);
        let response = self
            .http
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, self.ctx.bearer())
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("{}: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("REST {} answered 401, forcing sign-out", path);
            self.ctx.sign_out();
            return Err(SyncError::Auth(format!(
                "{} rejected the session token",
                path
            )));
        }
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Validation(format!("{}: {}", path, body)));
        }
        if !status.is_success() {
            return Err(SyncError::Network(format!("{} answered {}", path, status)));
        }
        Ok(response)
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<T, SyncError> {
        self.dispatch(method, path)
            .await?
            .json::<T>()
            .await
            .map_err(|e| SyncError::Network(format!("{}: malformed response: {}", path, e)))
    }

    // Mutating endpoints answer bodies we don't care about; only the status
    // matters.
    async fn request_unit(&self, method: Method, path: &str) -> Result<(), SyncError> {
        self.dispatch(method, path).await.map(|_| ())
    }
}

#[async_trait]
impl Api for RestClient {
    async fn user_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError> {
        self.request(Method::GET, "/getUserConversations").await
    }

    async fn conversation_messages(
        &self,
        other_user_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, SyncError> {
        let path = format!(
            "/getConversationMessages/{}?page={}&limit={}",
            other_user_id, page, limit
        );
        self.request(Method::GET, &path).await
    }

    async fn user_followers(&self, user_id: i64) -> Result<Vec<Contact>, SyncError> {
        self.request(Method::GET, &format!("/getUserFollowers/{}", user_id))
            .await
    }

    async fn user_following(&self, user_id: i64) -> Result<Vec<Contact>, SyncError> {
        self.request(Method::GET, &format!("/getUserFollowing/{}", user_id))
            .await
    }

    async fn user_notifications(&self) -> Result<Vec<Notification>, SyncError> {
        let feed: NotificationFeed = self.request(Method::GET, "/getUserNoti").await?;
        Ok(feed.data)
    }

    async fn unread_notification_count(&self) -> Result<u32, SyncError> {
        let count: UnreadCount = self.request(Method::GET, "/getUnreadNotiCount").await?;
        Ok(count.unread_count)
    }

    async fn mark_notification_read(&self, id: i64) -> Result<(), SyncError> {
        self.request_unit(Method::PUT, &format!("/markNotiAsRead/{}", id))
            .await
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        self.request_unit(Method::PUT, "/markAllNotiAsRead").await
    }

    async fn delete_notification(&self, id: i64) -> Result<(), SyncError> {
        self.request_unit(Method::DELETE, &format!("/deleteNoti/{}", id))
            .await
    }

    async fn delete_all_notifications(&self) -> Result<(), SyncError> {
        self.request_unit(Method::DELETE, "/deleteAllNoti").await
    }

    async fn profile(&self, user_id: i64) -> Result<Profile, SyncError> {
        self.request(Method::GET, &format!("/profile/{}", user_id))
            .await
    }

    async fn own_profile(&self) -> Result<Profile, SyncError> {
        self.request(Method::GET, "/profile").await
    }
}
