//! Live channel to the controller.
//!
//! [`Connection`] owns one WebSocket to the controller and keeps it alive:
//! whenever the socket closes, for whatever reason, a new attempt is made
//! after a fixed delay. There is no backoff and no attempt limit.
//!
//! Inbound text frames are parsed as [`DeviceSnapshot`]s and forwarded, in
//! arrival order, to a single consumer. A frame that does not parse is
//! forwarded as an [`Error::MalformedPayload`] so the consumer sees it.
//!
//! Outbound commands are fire-and-forget: [`Connection::send_command`]
//! drops the command unless the channel is open at that moment.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use osmose_types::DeviceSnapshot;

use crate::error::{Error, Result};
use crate::events::{ConsoleEvent, EventDispatcher};

/// A control command for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start a run.
    Start,
    /// Stop the current run.
    Stop,
}

impl Command {
    /// The bare string sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Connecting,
    /// The channel is open; commands are delivered.
    Open,
    /// The channel is closed; a reconnect is scheduled.
    Closed,
}

/// One inbound message: a parsed snapshot or the reason it did not parse.
pub type Inbound = Result<DeviceSnapshot>;

type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>;
type LastError = Arc<Mutex<Option<Error>>>;

/// A self-healing live channel.
///
/// The background task stops when [`shutdown`](Self::shutdown) is called,
/// when the `Connection` is dropped, or when the inbound receiver is dropped.
pub struct Connection {
    url: String,
    outbound: Outbound,
    state: watch::Receiver<ConnectionState>,
    connects: Arc<AtomicU32>,
    last_error: LastError,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &*self.state.borrow())
            .field("connects", &self.connect_count())
            .finish()
    }
}

impl Connection {
    /// Open the channel at `url` and keep it open.
    ///
    /// Parsed snapshots are sent to `inbound`. Connectivity changes are
    /// announced on `events`.
    pub fn spawn(
        url: impl Into<String>,
        reconnect_delay: Duration,
        inbound: mpsc::Sender<Inbound>,
        events: EventDispatcher,
    ) -> Self {
        let url = url.into();
        let outbound: Outbound = Arc::new(Mutex::new(None));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let connects = Arc::new(AtomicU32::new(0));
        let last_error: LastError = Arc::new(Mutex::new(None));
        let cancel_token = CancellationToken::new();

        let task = ChannelTask {
            url: url.clone(),
            reconnect_delay,
            inbound,
            events,
            outbound: Arc::clone(&outbound),
            state: state_tx,
            connects: Arc::clone(&connects),
            last_error: Arc::clone(&last_error),
            cancel_token: cancel_token.clone(),
        };
        let handle = tokio::spawn(task.run());

        Self {
            url,
            outbound,
            state: state_rx,
            connects,
            last_error,
            cancel_token,
            handle,
        }
    }

    /// The WebSocket URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current channel state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the channel is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch channel state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Number of successful connections so far.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Take the error of the most recent failed connection attempt.
    ///
    /// Cleared when a connection succeeds.
    pub fn take_last_error(&self) -> Option<Error> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Send a command if the channel is open.
    ///
    /// Returns `false` when the command was dropped. Dropped commands are
    /// not queued for a later connection.
    pub fn send_command(&self, command: Command) -> bool {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) if self.is_open() => tx.send(command).is_ok(),
            _ => {
                debug!("Dropping '{}' command: channel not open", command);
                false
            }
        }
    }

    /// Wait until the channel is open.
    ///
    /// Fails with [`Error::Cancelled`] if the connection is shut down first.
    pub async fn wait_open(&self) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .map(drop)
            .map_err(|_| Error::Cancelled)
    }

    /// Stop the background task and close the socket.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the background task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Why one socket session ended.
enum SessionEnd {
    /// The socket closed; reconnect.
    Lost,
    /// Shutdown requested or nobody consumes inbound messages.
    Stop,
}

struct ChannelTask {
    url: String,
    reconnect_delay: Duration,
    inbound: mpsc::Sender<Inbound>,
    events: EventDispatcher,
    outbound: Outbound,
    state: watch::Sender<ConnectionState>,
    connects: Arc<AtomicU32>,
    last_error: LastError,
    cancel_token: CancellationToken,
}

impl ChannelTask {
    async fn run(self) {
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!("Connecting to {}", self.url);

            let attempt = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                attempt = connect_async(self.url.as_str()) => attempt,
            };

            match attempt {
                Ok((socket, _)) => {
                    self.set_last_error(None);
                    if let SessionEnd::Stop = self.session(socket).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.url, e);
                    self.set_last_error(Some(e.into()));
                }
            }

            self.state.send_replace(ConnectionState::Closed);
            info!("Live channel closed, reconnecting in {:?}", self.reconnect_delay);
            self.events.send(ConsoleEvent::Disconnected {
                reconnect_in_ms: self.reconnect_delay.as_millis() as u64,
            });

            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_outbound(None);
        self.state.send_replace(ConnectionState::Closed);
        debug!("Live channel task stopped");
    }

    async fn session(&self, socket: WebSocketStream<MaybeTlsStream<TcpStream>>) -> SessionEnd {
        let (mut sink, mut source) = socket.split();
        let (tx, mut commands) = mpsc::unbounded_channel();

        self.connects.fetch_add(1, Ordering::Relaxed);
        self.set_outbound(Some(tx));
        self.state.send_replace(ConnectionState::Open);
        info!("Connected to {}", self.url);
        self.events.send(ConsoleEvent::Connected {
            url: self.url.clone(),
        });

        let end = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    let _ = sink.close().await;
                    break SessionEnd::Stop;
                }
                Some(command) = commands.recv() => {
                    debug!("Sending '{}' command", command);
                    if let Err(e) = sink.send(Message::text(command.as_str())).await {
                        warn!("Failed to send '{}' command: {}", command, e);
                        break SessionEnd::Lost;
                    }
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let parsed = serde_json::from_str::<DeviceSnapshot>(text.as_str())
                            .map_err(Error::from);
                        if let Err(e) = &parsed {
                            error!("Malformed message from controller: {}", e);
                        }
                        if self.inbound.send(parsed).await.is_err() {
                            debug!("Inbound receiver dropped, stopping");
                            break SessionEnd::Stop;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Controller closed the channel: {:?}", frame);
                        break SessionEnd::Lost;
                    }
                    // Ping/pong are answered by tungstenite; binary frames are not used
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Live channel error: {}", e);
                        break SessionEnd::Lost;
                    }
                    None => break SessionEnd::Lost,
                },
            }
        };

        self.set_outbound(None);
        end
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<Command>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = tx;
    }

    fn set_last_error(&self, err: Option<Error>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }
}
