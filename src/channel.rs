//! Event channel — persistent websocket connection to the relay.
//!
//! LIFECYCLE
//! =========
//! 1. Build the relay URL with the current announcement attached as the
//!    `clock` query parameter, so the relay can spot id clashes during the
//!    handshake.
//! 2. Connect under a timeout. On success report `Connected` and hand a
//!    `ChannelEvent::Connected` to the client loop.
//! 3. Pump frames both ways until the socket drops or `close()` is called.
//! 4. On loss report `Disconnected`, sleep with exponential backoff, and
//!    retry as `Reconnecting`.
//!
//! DESIGN
//! ======
//! Inbound frames are forwarded in arrival order on one bounded queue and
//! are never coalesced. Outbound frames queue on an unbounded channel that
//! is only drained while connected; there is no application-level retry.
//! The resync handshake after reconnect is the recovery path instead.
//!
//! When a session starts, the backlog queued while offline is flushed
//! before the client hears `Connected`. Replies addressed to a single peer
//! (`request_callback`, `clock_error`) are dropped from that backlog since
//! the peer has long stopped waiting; state changes are still sent.

use std::fmt;
use std::time::Duration;

use frames::Frame;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SyncError;
use crate::events::{Announcement, EVENT_CLOCK_ERROR, EVENT_REQUEST_CALLBACK, Outbound};

const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Outbound events that are not worth sending once the connection they were
/// meant for is gone.
const OFFLINE_STALE_EVENTS: &[&str] = &[EVENT_REQUEST_CALLBACK, EVENT_CLOCK_ERROR];

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid relay URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Connection state as shown to the operator. Protocol logic never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    TimedOut,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::TimedOut => "Connection time out",
        })
    }
}

/// What the channel hands to the client loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The transport (re)connected.
    Connected,
    /// A frame arrived from the relay.
    Frame(Frame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub relay_url: String,
    pub relay_path: String,
    pub connect_timeout: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

// =============================================================================
// SENDER
// =============================================================================

/// Cloneable handle for queueing outbound events.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl EventSender {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }

    /// Queue an event for the relay.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportDisconnected`] once the channel task has
    /// shut down.
    pub fn send(&self, event: Outbound) -> Result<(), SyncError> {
        let frame = event.into_frame();
        debug!(event = %frame.event, id = %frame.id, "channel: queue frame");
        self.tx.send(frame).map_err(|_| SyncError::TransportDisconnected)
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

pub struct EventChannel {
    sender: EventSender,
    state: watch::Receiver<ConnectivityState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EventChannel {
    /// Spawn the connection task.
    ///
    /// The announcement is read afresh at every connect attempt. Returns the
    /// channel handle and the inbound event queue for the client loop.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] if the relay URL cannot be used.
    pub fn connect(
        config: ChannelConfig,
        announcement: watch::Receiver<Announcement>,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), ChannelError> {
        // Fail fast on a bad URL rather than inside the retry loop.
        relay_url(&config.relay_url, &config.relay_path, &announcement.borrow())?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectivityState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            config,
            announcement,
            outbound: outbound_rx,
            inbound: inbound_tx,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        let channel = Self { sender: EventSender::new(outbound_tx), state: state_rx, shutdown: shutdown_tx, task };
        Ok((channel, inbound_rx))
    }

    #[must_use]
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Observe connectivity changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state.clone()
    }

    /// Close the socket and stop reconnecting.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// =============================================================================
// WORKER
// =============================================================================

enum SessionEnd {
    Lost,
    Shutdown,
}

struct Worker {
    config: ChannelConfig,
    announcement: watch::Receiver<Announcement>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::Sender<ChannelEvent>,
    state: watch::Sender<ConnectivityState>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut backoff = self.config.backoff_min;
        let mut connected_before = false;

        loop {
            let attempt_state =
                if connected_before { ConnectivityState::Reconnecting } else { ConnectivityState::Connecting };
            self.set_state(attempt_state);

            let url = match relay_url(&self.config.relay_url, &self.config.relay_path, &self.announcement.borrow()) {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "channel: cannot build relay URL");
                    break;
                }
            };

            let attempt = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str()));
            let result = tokio::select! {
                result = attempt => result,
                _ = self.shutdown.changed() => break,
            };

            match result {
                Ok(Ok((stream, _))) => {
                    info!(relay = %self.config.relay_url, "channel: connected");
                    self.set_state(ConnectivityState::Connected);
                    connected_before = true;
                    backoff = self.config.backoff_min;
                    match self.pump(stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost => {
                            warn!("channel: connection lost");
                            self.set_state(ConnectivityState::Disconnected);
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "channel: connect failed");
                    self.set_state(ConnectivityState::Disconnected);
                }
                Err(_) => {
                    warn!(timeout_secs = self.config.connect_timeout.as_secs(), "channel: connect timed out");
                    self.set_state(ConnectivityState::TimedOut);
                }
            }

            debug!(backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX), "channel: backing off");
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.changed() => break,
            }
            backoff = (backoff * 2).min(self.config.backoff_max);
        }

        self.set_state(ConnectivityState::Disconnected);
        info!("channel: closed");
    }

    /// Move frames both ways until the socket ends or shutdown is requested.
    async fn pump<S>(&mut self, stream: tokio_tungstenite::WebSocketStream<S>) -> SessionEnd
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut ws_write, mut ws_read) = stream.split();

        let mut dropped = 0_usize;
        while let Ok(frame) = self.outbound.try_recv() {
            if OFFLINE_STALE_EVENTS.contains(&frame.event.as_str()) {
                dropped += 1;
                continue;
            }
            debug!(event = %frame.event, id = %frame.id, "channel: send backlog frame");
            if ws_write.send(Message::Binary(frames::encode_frame(&frame).into())).await.is_err() {
                return SessionEnd::Lost;
            }
        }
        if dropped > 0 {
            info!(dropped, "channel: dropped stale replies queued while offline");
        }

        if self.inbound.send(ChannelEvent::Connected).await.is_err() {
            return SessionEnd::Shutdown;
        }

        loop {
            tokio::select! {
                msg = ws_read.next() => {
                    let Some(Ok(msg)) = msg else { return SessionEnd::Lost };
                    match msg {
                        Message::Binary(bytes) => match frames::decode_frame(&bytes) {
                            Ok(frame) => {
                                debug!(event = %frame.event, id = %frame.id, "channel: recv frame");
                                if self.inbound.send(ChannelEvent::Frame(frame)).await.is_err() {
                                    return SessionEnd::Shutdown;
                                }
                            }
                            Err(e) => warn!(error = %e, "channel: undecodable frame"),
                        },
                        Message::Close(_) => return SessionEnd::Lost,
                        _ => {}
                    }
                }
                Some(frame) = self.outbound.recv() => {
                    debug!(event = %frame.event, id = %frame.id, "channel: send frame");
                    if ws_write.send(Message::Binary(frames::encode_frame(&frame).into())).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                _ = self.shutdown.changed() => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    fn set_state(&self, state: ConnectivityState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Websocket URL for the relay with the announcement as connect metadata.
///
/// `http(s)` base URLs are mapped onto `ws(s)`.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidUrl`] for unparseable URLs or schemes
/// other than http, https, ws, and wss.
pub fn relay_url(base: &str, path: &str, announcement: &Announcement) -> Result<Url, ChannelError> {
    let invalid = |reason: String| ChannelError::InvalidUrl { url: base.to_owned(), reason };

    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch to {scheme}")))?;
    url.set_path(path);
    url.query_pairs_mut()
        .clear()
        .append_pair("clock", &announcement.to_json());
    Ok(url)
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
