// Connect, reconnect and frame-pump machinery for RealtimeSession.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::realtime::events::{InboundEvent, OutboundAction, SessionSignal};
use crate::realtime::{Handler, RealtimeSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;
const BACKOFF_JITTER_MS: u64 = 250;

impl RealtimeSession {
    /// Open the channel. The first handshake happens inline so a rejected
    /// token fails the call with an auth error; afterwards a driver task
    /// owns the socket and reconnects with backoff on its own.
    pub async fn connect(ctx: &SessionContext) -> Result<RealtimeSession, SyncError> {
        if ctx.token().trim().is_empty() {
            return Err(SyncError::Auth("no session token".to_string()));
        }

        let stream = open_channel(ctx).await?;
        info!("realtime channel established at {}", ctx.ws_url());

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let session = RealtimeSession {
            ctx: ctx.clone(),
            handlers: Arc::new(Mutex::new(Vec::new())),
            outbound_tx,
            // The handshake above already succeeded.
            connected: Arc::new(AtomicBool::new(true)),
        };

        let driver = Driver {
            ctx: ctx.clone(),
            handlers: session.handlers.clone(),
            connected: session.connected.clone(),
        };
        tokio::spawn(driver.run(stream, outbound_rx));

        Ok(session)
    }
}

async fn open_channel(ctx: &SessionContext) -> Result<WsStream, SyncError> {
    let mut request = ctx
        .ws_url()
        .into_client_request()
        .map_err(|e| SyncError::Network(format!("invalid realtime URL: {}", e)))?;
    let bearer = HeaderValue::from_str(&ctx.bearer())
        .map_err(|e| SyncError::Auth(format!("token is not a valid header value: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match connect_async(request).await {
        Ok((stream, _response)) => Ok(stream),
        Err(WsError::Http(response))
            if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
        {
            ctx.sign_out();
            Err(SyncError::Auth(format!(
                "realtime handshake rejected with {}",
                response.status()
            )))
        }
        Err(e) => Err(SyncError::Network(format!(
            "realtime handshake failed: {}",
            e
        ))),
    }
}

struct Driver {
    ctx: SessionContext,
    handlers: Arc<Mutex<Vec<Handler>>>,
    connected: Arc<AtomicBool>,
}

impl Driver {
    async fn run(self, first: WsStream, mut outbound_rx: mpsc::UnboundedReceiver<OutboundAction>) {
        let mut stream = Some(first);
        let mut resumed = false;

        loop {
            let ws = match stream.take() {
                Some(ws) => ws,
                None => match self.reconnect().await {
                    Some(ws) => ws,
                    None => break,
                },
            };

            self.connected.store(true, Ordering::SeqCst);
            self.deliver(&SessionSignal::Connected { reconnect: resumed });
            resumed = true;

            let session_alive = self.pump(ws, &mut outbound_rx).await;
            self.connected.store(false, Ordering::SeqCst);
            if !session_alive {
                // Every session handle has been dropped; nobody is left to
                // observe a Disconnected signal.
                break;
            }
            self.deliver(&SessionSignal::Disconnected);
        }
        info!("realtime driver stopped");
    }

    /// Pump one live socket until it dies. Returns false when the outbound
    /// channel closed, i.e. the session itself was dropped.
    async fn pump(
        &self,
        ws: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<OutboundAction>,
    ) -> bool {
        let (mut sink, mut source) = ws.split();
        loop {
            tokio::select! {
                action = outbound_rx.recv() => match action {
                    Some(action) => {
                        let frame = match serde_json::to_string(&action) {
                            Ok(frame) => frame,
                            Err(e) => {
                                error!("failed to encode outbound action: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                            warn!("realtime send failed, socket lost: {}", e);
                            return true;
                        }
                    }
                    None => return false,
                },
                frame = source.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<InboundEvent>(text.as_str()) {
                            Ok(event) => self.deliver(&SessionSignal::Event(event)),
                            // Malformed server frames are a transport-level
                            // nuisance, not a session-ending failure.
                            Err(e) => warn!("dropping malformed event frame: {}", e),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("realtime socket closed by server");
                        return true;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => {
                        warn!("realtime socket error: {}", e);
                        return true;
                    }
                }
            }
        }
    }

    async fn reconnect(&self) -> Option<WsStream> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let delay = backoff_delay(attempt);
            info!(
                "reconnecting realtime channel in {:?} (attempt {})",
                delay, attempt
            );
            tokio::time::sleep(delay).await;

            match open_channel(&self.ctx).await {
                Ok(ws) => {
                    info!("realtime channel re-established");
                    return Some(ws);
                }
                Err(e) if e.is_auth() => {
                    // The token died while we were away. Missed state cannot
                    // be recovered without a new sign-in, so stop here.
                    error!("realtime reconnect rejected: {}", e);
                    self.ctx.sign_out();
                    return None;
                }
                Err(e) => warn!("reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }

    fn deliver(&self, signal: &SessionSignal) {
        if let Ok(mut handlers) = self.handlers.lock() {
            for handler in handlers.iter_mut() {
                handler(signal);
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt.min(6)));
    let capped = exp.min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(capped + jitter)
}
