use anyhow::{anyhow, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

mod credentials;
mod utils;

use crate::credentials::{load_credentials, save_credentials, Credentials};
use undercurrent::store::notifications::UNREAD_POLL_INTERVAL;
use undercurrent::{
    ActionSink, ConversationList, ConversationStore, InboundEvent, NotificationStore,
    PresenceTracker, RealtimeSession, RestClient, SessionContext, SessionSignal,
};

/// Command line arguments for undercurrent
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "undercurrent: headless realtime sync client for the feed backend.",
    long_about = "Connects the realtime channel, keeps the conversation, inbox and \
    notification stores in sync, and tails incoming events as log lines.\n\n\
    Credentials are resolved from flags, then FEED_API_URL/FEED_USER_ID/FEED_TOKEN, \
    then the saved credentials file, then an interactive prompt."
)]
struct Args {
    /// REST base URL, e.g. https://api.example.com
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Realtime endpoint override (defaults to the base URL with ws scheme)
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Numeric id of the signed-in user
    #[arg(long, value_name = "ID")]
    user_id: Option<i64>,

    /// Bearer token for the session
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Read/write credentials at this path instead of the config dir
    #[arg(long, value_name = "PATH")]
    credentials_file: Option<PathBuf>,

    /// Append logs to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<String>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

/// Resolve credentials: flags, then environment, then the saved file, then
/// an interactive prompt.
fn resolve_credentials(args: &Args) -> Result<Credentials> {
    if let (Some(base_url), Some(user_id), Some(token)) =
        (&args.base_url, args.user_id, &args.token)
    {
        let mut creds = Credentials::new(base_url, user_id, token);
        creds.ws_url = args.ws_url.clone();
        if let Err(e) = save_credentials(&creds) {
            warn!("Could not save credentials: {}", e);
        }
        return Ok(creds);
    }

    if let (Ok(base_url), Ok(user_id), Ok(token)) = (
        env::var("FEED_API_URL"),
        env::var("FEED_USER_ID"),
        env::var("FEED_TOKEN"),
    ) {
        let user_id: i64 = user_id
            .parse()
            .map_err(|_| anyhow!("FEED_USER_ID must be a number, got '{}'", user_id))?;
        let mut creds = Credentials::new(&base_url, user_id, &token);
        creds.ws_url = args.ws_url.clone();
        if let Err(e) = save_credentials(&creds) {
            warn!("Could not save credentials: {}", e);
        }
        return Ok(creds);
    }

    if let Some(creds) = load_credentials()? {
        return Ok(creds);
    }

    eprintln!("Enter API base URL (e.g. https://api.example.com):");
    let base_url = utils::read_line()?;
    eprintln!("Enter your numeric user id:");
    let user_id: i64 = utils::read_line()?
        .parse()
        .map_err(|_| anyhow!("user id must be a number"))?;
    eprintln!("Enter your bearer token (input is not hidden):");
    let token = utils::read_line()?;

    let creds = Credentials::new(&base_url, user_id, &token);
    if let Err(e) = save_credentials(&creds) {
        warn!("Could not save credentials: {}", e);
    }
    Ok(creds)
}

fn describe(signal: &SessionSignal) {
    match signal {
        SessionSignal::Connected { reconnect: false } => info!("channel up"),
        SessionSignal::Connected { reconnect: true } => info!("channel back, stores resyncing"),
        SessionSignal::Disconnected => warn!("channel lost, reconnecting"),
        SessionSignal::Event(InboundEvent::ReceiveMessage { message }) => {
            info!(
                "message {} from {} to {}: {}",
                message.id, message.sender_id, message.receiver_id, message.content
            );
        }
        SessionSignal::Event(InboundEvent::MessageUpdated { message }) => {
            info!("message {} edited", message.id);
        }
        SessionSignal::Event(InboundEvent::MessageDeleted { message_id }) => {
            info!("message {} deleted", message_id);
        }
        SessionSignal::Event(InboundEvent::UserStatus { user_id, online }) => {
            info!(
                "user {} is now {}",
                user_id,
                if *online { "online" } else { "offline" }
            );
        }
        SessionSignal::Event(InboundEvent::NewNotification { notification }) => {
            info!(
                "notification {} ({:?}) from user {}",
                notification.id, notification.kind, notification.from_user_id
            );
        }
        SessionSignal::Event(InboundEvent::ServerError { message }) => {
            warn!("server error event: {}", message);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    utils::setup_logging(args.log_file.as_deref(), level)?;

    if let Some(path) = &args.credentials_file {
        credentials::set_config_path_override(path.clone());
    }

    let creds = resolve_credentials(&args)?;
    let token = creds
        .get_token()
        .ok_or_else(|| anyhow!("stored credentials carry no token; pass --token"))?;

    let mut ctx = SessionContext::new(&creds.base_url, &token, creds.user_id);
    if let Some(ws_url) = &creds.ws_url {
        ctx = ctx.with_ws_url(ws_url);
    }

    info!(
        "Connecting user {} to {} (events via {})",
        ctx.user_id(),
        ctx.base_url(),
        ctx.ws_url()
    );
    let session = RealtimeSession::connect(&ctx).await?;

    let api: Arc<dyn undercurrent::Api> = Arc::new(RestClient::new(ctx.clone()));
    let sink: Arc<dyn ActionSink> = Arc::new(session.clone());

    match api.own_profile().await {
        Ok(profile) => info!("Signed in as {} (user {})", profile.username, profile.id),
        Err(e) => warn!("could not fetch own profile: {}", e),
    }

    let presence = PresenceTracker::new();
    presence.attach(&session);

    let conversations = ConversationStore::new(ctx.clone(), api.clone(), sink);
    conversations.attach(&session);

    let inbox = ConversationList::new(ctx.clone(), api.clone());
    inbox.attach(&session);

    // Terminal bell as the attention signal.
    let notifications = NotificationStore::new(ctx.clone(), api.clone())
        .with_attention_signal(|n| eprintln!("\u{7}{:?} notification!", n.kind));
    notifications.attach(&session);

    session.on(describe);

    // Initial REST sync; the channel only carries deltas from here on.
    if let Err(e) = inbox.refresh().await {
        warn!("initial inbox fetch failed: {}", e);
    }
    if let Err(e) = inbox.load_contacts().await {
        warn!("contact fetch failed: {}", e);
    }
    if let Err(e) = notifications.fetch_unread_count().await {
        warn!("unread count fetch failed: {}", e);
    }
    if let Err(e) = notifications.fetch_all().await {
        warn!("notification fetch failed: {}", e);
    }

    for summary in inbox.summaries() {
        info!(
            "conversation with {} ({} unread): {}",
            summary.username, summary.unread_count, summary.last_message
        );
    }
    info!(
        "{} contacts, {} unread notifications",
        inbox.contacts().len(),
        notifications.unread_count()
    );

    let poll = notifications.spawn_unread_poll(UNREAD_POLL_INTERVAL);

    info!("Tailing realtime events (ctrl-c to quit)");
    tokio::signal::ctrl_c().await?;

    poll.abort();
    info!("Shutting down");
    Ok(())
}
