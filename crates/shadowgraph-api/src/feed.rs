//! Change-notification feed with auto-reconnect.
//!
//! Connects to the notification bus's WebSocket bridge and forwards parsed
//! [`RawChangeEvent`]s through a bounded [`tokio::sync::mpsc`] channel.
//! The channel applies backpressure instead of dropping messages: when the
//! consumer falls behind, the reader stops pulling frames off the socket.
//! Reconnection uses exponential backoff + jitter.
//!
//! Delivery is at-least-once. After a reconnect the bus may replay
//! notifications the consumer has already seen; consumers must be idempotent.
//!
//! # Example
//!
//! ```rust,ignore
//! use shadowgraph_api::feed::{FeedHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let url = Url::parse("wss://config-node:8443/notifications")?;
//!
//! let mut handle = FeedHandle::connect(url, ReconnectConfig::default(), cancel.clone(), None)?;
//! let mut rx = handle.take_events().expect("first take");
//!
//! while let Some(event) = rx.recv().await {
//!     println!("{:?} {:?}", event.oper, event.resource_type);
//! }
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::models::RawChangeEvent;
use crate::transport::AUTH_TOKEN_HEADER;

// ── Channel capacity ─────────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for feed reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── FeedStatus ───────────────────────────────────────────────────────

/// Connection state published by the background loop.
///
/// `GaveUp` is published before the event channel closes, so a consumer
/// that sees the channel end can tell exhaustion apart from a shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal. The reconnection limit was reached.
    GaveUp { attempts: u32, error: String },
}

// ── FeedHandle ───────────────────────────────────────────────────────

/// Handle to a running change feed.
///
/// The event receiver can be taken exactly once; the feed's single
/// consumer is the coordinator's ingest loop.
pub struct FeedHandle {
    events: Option<mpsc::Receiver<RawChangeEvent>>,
    status: watch::Receiver<FeedStatus>,
    cancel: CancellationToken,
}

impl FeedHandle {
    /// Spawn the reconnection loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously.
    pub fn connect(
        url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        auth_token: Option<SecretString>,
    ) -> Result<Self, Error> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::WebSocketConnect(format!(
                "unsupported scheme '{}' (expected ws or wss)",
                url.scheme()
            )));
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            feed_loop(url, event_tx, status_tx, reconnect, task_cancel, auth_token).await;
        });

        Ok(Self {
            events: Some(event_rx),
            status: status_rx,
            cancel,
        })
    }

    /// Subscribe to connection state changes.
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Take the event receiver. Returns `None` on every call after the first.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<RawChangeEvent>> {
        self.events.take()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn feed_loop(
    url: Url,
    event_tx: mpsc::Sender<RawChangeEvent>,
    status: watch::Sender<FeedStatus>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    auth_token: Option<SecretString>,
) {
    let mut attempt: u32 = 0;

    loop {
        if event_tx.is_closed() {
            tracing::debug!("feed consumer dropped, stopping");
            break;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&url, &event_tx, &status, &cancel, auth_token.as_ref()) => {
                match result {
                    Ok(()) => {
                        tracing::info!("change feed disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "change feed error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "change feed reconnection limit reached, giving up"
                                );
                                status.send_replace(FeedStatus::GaveUp {
                                    attempts: attempt,
                                    error: e.to_string(),
                                });
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt = attempt.saturating_add(1);
                        status.send_replace(FeedStatus::Reconnecting { attempt });
                    }
                }
            }
        }
    }

    tracing::debug!("change feed loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a single WebSocket connection, read messages until it drops.
async fn connect_and_read(
    url: &Url,
    event_tx: &mpsc::Sender<RawChangeEvent>,
    status: &watch::Sender<FeedStatus>,
    cancel: &CancellationToken,
    auth_token: Option<&SecretString>,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to change feed");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = auth_token {
        request = request.with_header(AUTH_TOKEN_HEADER, token.expose_secret());
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("change feed connected");
    status.send_replace(FeedStatus::Connected);

    let (_write, mut read) = stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        for event in parse_frame(&text) {
                            tokio::select! {
                                biased;
                                () = cancel.cancelled() => return Ok(()),
                                sent = event_tx.send(event) => {
                                    if sent.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pings automatically
                        tracing::trace!("change feed ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(cf) = frame {
                            return Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.to_string(),
                            });
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("change feed stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse one text frame. The bridge sends either a single notification
/// object or a JSON array of them; anything else is logged and skipped.
fn parse_frame(text: &str) -> Vec<RawChangeEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse change feed frame");
            return Vec::new();
        }
    };

    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawChangeEvent>(item) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable notification");
                None
            }
        })
        .collect()
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple consumers.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
