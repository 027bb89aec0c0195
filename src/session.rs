//! Console stream session with auto-reconnect.
//!
//! [`ConsoleSession`] is a cheap handle to a supervisor task that owns the
//! whole connection lifecycle for one server console:
//!
//! ```text
//! Idle ──start──▶ Connecting ──credential + open──▶ Authenticating ──auth success──▶ Open
//!                     ▲                                   │                            │
//!                     │                       jwt error / token expired / close ◀──────┘
//!                     │                                   ▼
//!                     └──── reconnect timer / keep-alive ─ Reconnecting
//! ```
//!
//! All state lives in the supervisor and is mutated only from its event
//! loop, one handler per event. The handle's methods never block: they
//! enqueue a command and return. Outcomes reach the UI as [`ConsoleEvent`]s on
//! a single ordered channel.
//!
//! ## Reconnect
//!
//! After an unexpected close one reconnect is scheduled after a fixed delay.
//! While disconnected a keep-alive interval also retries. Both go through the
//! same guarded entry point, so at most one attempt or transport exists at
//! any time. Every attempt bumps a generation counter; credential and
//! transport results tagged with an older generation are discarded, which is
//! what keeps a late credential from connecting after `stop()`.
//!
//! Credentials are single-use, so each attempt fetches a fresh one. A line
//! cut off by a disconnect is dropped rather than stitched to the next
//! connection's output.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ansi::AnsiStripper;
use crate::config::ConsoleConfig;
use crate::error::{ProvisionError, SessionFault, TransportError};
use crate::protocol::{self, InboundFrame, ResourceStats};
use crate::provisioner::{ConnectionCredential, CredentialSource};
use crate::reassembly::{LineReassembler, DEFAULT_DAEMON_MARKER};
use crate::transport::{Connector, TransportHandle};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Fetching a credential or opening the transport.
    Connecting,
    /// Transport open, `auth` frame sent.
    Authenticating,
    Open,
    /// Closed unexpectedly; waiting for the reconnect timer or keep-alive.
    Reconnecting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI observes, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// Lines completed by one inbound chunk.
    Lines(Vec<String>),
    /// Connectivity changed.
    Connection(bool),
    /// Server power state (`running`, `offline`, ...).
    Status(String),
    Stats(ResourceStats),
    /// `clear()` was processed; drop the visible lines.
    Cleared,
}

/// Session tuning, usually built from [`ConsoleConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
    pub daemon_marker: String,
    pub strip_ansi: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(15),
            daemon_marker: DEFAULT_DAEMON_MARKER.to_string(),
            strip_ansi: true,
        }
    }
}

impl From<&ConsoleConfig> for SessionOptions {
    fn from(c: &ConsoleConfig) -> Self {
        Self {
            reconnect_delay: c.reconnect_delay(),
            keepalive_interval: c.keepalive_interval(),
            daemon_marker: c.daemon_marker.clone(),
            strip_ansi: c.strip_ansi,
        }
    }
}

/// Requests from the handle.
enum Command {
    Start(String),
    Stop,
    Send(String),
    Clear,
}

/// Why a credential was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Connect,
    /// Re-auth an open transport after `token expiring`.
    Refresh,
}

/// Results posted back by tasks the supervisor spawned.
enum Internal {
    Credential {
        generation: u64,
        purpose: Purpose,
        result: Result<ConnectionCredential, ProvisionError>,
    },
    Opened {
        generation: u64,
        token: String,
        result: Result<TransportHandle, TransportError>,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Handle to a console session. Dropping it tears the session down.
pub struct ConsoleSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl ConsoleSession {
    /// Spawn an idle session. Events arrive on the returned receiver.
    pub fn spawn(
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ConsoleEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let supervisor =
            Supervisor::new(credentials, connector, options, event_tx, state_tx, internal_tx);
        let task = tokio::spawn(supervisor.run(cmd_rx, internal_rx));

        (
            Self {
                commands: cmd_tx,
                state: state_rx,
                task,
            },
            event_rx,
        )
    }

    /// Connect to `server`'s console. No-op if already started for the same
    /// server; restarts if the server differs.
    pub fn start(&self, server: impl Into<String>) {
        let _ = self.commands.send(Command::Start(server.into()));
    }

    /// Close everything and return to idle. Safe to call any number of times.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Send a console command. Dropped unless the session is open; blank
    /// input is ignored. Fire-and-forget.
    pub fn send_command(&self, text: &str) {
        let _ = self.commands.send(Command::Send(text.to_string()));
    }

    /// Discard partial output and tell the UI to clear its lines. The
    /// transport is left alone.
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stop and wait for the supervisor to exit.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        let _ = commands.send(Command::Stop);
        drop(commands);
        let _ = task.await;
    }
}

/// Single owner of all session state.
struct Supervisor {
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    events: mpsc::UnboundedSender<ConsoleEvent>,
    state_tx: watch::Sender<SessionState>,
    internal_tx: mpsc::UnboundedSender<Internal>,

    state: SessionState,
    server: Option<String>,
    /// Bumped by every attempt and by `stop`; results from older generations are stale.
    generation: u64,
    transport: Option<TransportHandle>,
    /// In-flight credential fetch or transport open.
    attempt: Option<JoinHandle<()>>,
    /// In-flight token refresh.
    refresh: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Runs only while disconnected.
    keepalive: Option<Interval>,
    reassembler: LineReassembler,
    ansi: AnsiStripper,
    /// Whether `Connection(true)` was the last connectivity event sent.
    connected: bool,
}

impl Supervisor {
    fn new(
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
        events: mpsc::UnboundedSender<ConsoleEvent>,
        state_tx: watch::Sender<SessionState>,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        Self {
            credentials,
            connector,
            reassembler: LineReassembler::new(options.daemon_marker.clone()),
            ansi: AnsiStripper::new(),
            options,
            events,
            state_tx,
            internal_tx,
            state: SessionState::Idle,
            server: None,
            generation: 0,
            transport: None,
            attempt: None,
            refresh: None,
            reconnect: None,
            keepalive: None,
            connected: false,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd),
                        None => {
                            // Handle dropped
                            self.halt();
                            return;
                        }
                    }
                }
                Some(msg) = internal.recv() => self.on_internal(msg),
                frame = next_frame(&mut self.transport) => self.on_frame(frame),
                () = next_tick(&mut self.keepalive) => self.on_keepalive(),
            }
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(server) => self.start(server),
            Command::Stop => self.halt(),
            Command::Send(text) => self.send_command(&text),
            Command::Clear => {
                self.reset_stream();
                self.emit(ConsoleEvent::Cleared);
            }
        }
    }

    fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Credential {
                generation,
                purpose,
                result,
            } => self.on_credential(generation, purpose, result),
            Internal::Opened {
                generation,
                token,
                result,
            } => self.on_opened(generation, &token, result),
            Internal::ReconnectDue { generation } => self.on_reconnect_due(generation),
        }
    }

    fn start(&mut self, server: String) {
        if self.state != SessionState::Idle {
            if self.server.as_deref() == Some(server.as_str()) {
                debug!(server = %server, "console already started");
                return;
            }
            self.halt();
        }
        info!(server = %server, "starting console session");
        self.server = Some(server);
        self.begin_attempt();
    }

    /// The one place a connection attempt starts.
    fn begin_attempt(&mut self) {
        if matches!(
            self.state,
            SessionState::Connecting | SessionState::Authenticating | SessionState::Open
        ) {
            debug!(state = %self.state, "connection attempt already in flight");
            return;
        }
        let Some(server) = self.server.clone() else {
            return;
        };

        cancel(&mut self.reconnect);
        cancel(&mut self.attempt);
        self.generation += 1;
        let generation = self.generation;
        self.set_state(SessionState::Connecting);

        let credentials = Arc::clone(&self.credentials);
        let tx = self.internal_tx.clone();
        self.attempt = Some(tokio::spawn(async move {
            let result = credentials.issue(&server).await;
            let _ = tx.send(Internal::Credential {
                generation,
                purpose: Purpose::Connect,
                result,
            });
        }));
    }

    fn on_credential(
        &mut self,
        generation: u64,
        purpose: Purpose,
        result: Result<ConnectionCredential, ProvisionError>,
    ) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "discarding stale credential");
            return;
        }

        match purpose {
            Purpose::Connect => {
                if self.state != SessionState::Connecting {
                    debug!(state = %self.state, "discarding credential, no longer connecting");
                    return;
                }
                match result {
                    Ok(credential) => {
                        debug!(
                            server = %credential.server_identity,
                            url = %credential.endpoint_url,
                            "console credential issued"
                        );
                        let connector = Arc::clone(&self.connector);
                        let tx = self.internal_tx.clone();
                        self.attempt = Some(tokio::spawn(async move {
                            let result = connector.open(&credential.endpoint_url).await;
                            let _ = tx.send(Internal::Opened {
                                generation,
                                token: credential.auth_token,
                                result,
                            });
                        }));
                    }
                    Err(e) => {
                        warn!(
                            fault = %SessionFault::CredentialUnavailable,
                            "could not obtain console credential: {e}"
                        );
                        self.attempt = None;
                        // No timer: the keep-alive retries
                        self.enter_reconnecting(false);
                    }
                }
            }
            Purpose::Refresh => {
                self.refresh = None;
                if self.state != SessionState::Open {
                    return;
                }
                match result {
                    Ok(credential) => {
                        info!("re-authenticating console with refreshed token");
                        self.transmit(protocol::auth_frame(&credential.auth_token));
                    }
                    Err(e) => warn!(
                        fault = %SessionFault::CredentialUnavailable,
                        "console token refresh failed: {e}"
                    ),
                }
            }
        }
    }

    fn on_opened(
        &mut self,
        generation: u64,
        token: &str,
        result: Result<TransportHandle, TransportError>,
    ) {
        if generation != self.generation || self.state != SessionState::Connecting {
            // Dropping the handle closes the socket
            debug!(generation, current = self.generation, "discarding stale transport");
            return;
        }
        self.attempt = None;

        match result {
            Ok(handle) => {
                self.transport = Some(handle);
                self.set_state(SessionState::Authenticating);
                self.transmit(protocol::auth_frame(token));
            }
            Err(e) => {
                warn!(
                    fault = %SessionFault::TransportClosed,
                    "console transport failed to open: {e}"
                );
                self.enter_reconnecting(true);
            }
        }
    }

    fn on_frame(&mut self, frame: Option<String>) {
        let Some(text) = frame else {
            warn!(fault = %SessionFault::TransportClosed, state = %self.state, "console transport closed");
            self.lose_transport();
            return;
        };

        let frame = match InboundFrame::parse(&text) {
            Ok(f) => f,
            Err(e) => {
                debug!("ignoring malformed console frame: {e}");
                return;
            }
        };

        match frame {
            InboundFrame::AuthSuccess => self.on_authenticated(),
            InboundFrame::ConsoleOutput(chunk) => self.on_output(&chunk),
            InboundFrame::JwtError(reason) => {
                warn!(fault = %SessionFault::AuthRejected, "console token rejected: {reason}");
                self.lose_transport();
            }
            InboundFrame::TokenExpired => {
                warn!(fault = %SessionFault::AuthRejected, "console token expired");
                self.lose_transport();
            }
            InboundFrame::TokenExpiring => self.refresh_token(),
            InboundFrame::Status(status) => self.emit(ConsoleEvent::Status(status)),
            InboundFrame::Stats(stats) => self.emit(ConsoleEvent::Stats(stats)),
            InboundFrame::DaemonError(message) => warn!("daemon error: {message}"),
            InboundFrame::Other(event) => debug!(event = %event, "unhandled console event"),
        }
    }

    fn on_authenticated(&mut self) {
        match self.state {
            SessionState::Authenticating => {
                self.set_state(SessionState::Open);
                self.keepalive = None;
                cancel(&mut self.reconnect);
                info!(server = self.server.as_deref().unwrap_or(""), "console connected");
                if !self.connected {
                    self.connected = true;
                    self.emit(ConsoleEvent::Connection(true));
                }
            }
            SessionState::Open => debug!("console re-authenticated"),
            _ => {}
        }
    }

    fn on_output(&mut self, chunk: &str) {
        if self.state != SessionState::Open {
            debug!(state = %self.state, "dropping console output before auth");
            return;
        }
        let lines = if self.options.strip_ansi {
            let text = self.ansi.strip(chunk);
            self.reassembler.push(&text)
        } else {
            self.reassembler.push(chunk)
        };
        if !lines.is_empty() {
            self.emit(ConsoleEvent::Lines(lines));
        }
    }

    fn refresh_token(&mut self) {
        if self.state != SessionState::Open || self.refresh.is_some() {
            return;
        }
        let Some(server) = self.server.clone() else {
            return;
        };
        debug!("console token expiring, requesting a fresh one");
        let generation = self.generation;
        let credentials = Arc::clone(&self.credentials);
        let tx = self.internal_tx.clone();
        self.refresh = Some(tokio::spawn(async move {
            let result = credentials.issue(&server).await;
            let _ = tx.send(Internal::Credential {
                generation,
                purpose: Purpose::Refresh,
                result,
            });
        }));
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        self.reconnect = None;
        if self.state == SessionState::Reconnecting {
            info!("reconnecting console");
            self.begin_attempt();
        }
    }

    fn on_keepalive(&mut self) {
        if self.state == SessionState::Reconnecting {
            debug!("keep-alive: console disconnected, retrying");
            self.begin_attempt();
        }
    }

    fn send_command(&mut self, text: &str) {
        let command = text.trim();
        if command.is_empty() {
            return;
        }
        if self.state != SessionState::Open {
            debug!(fault = %SessionFault::SendIgnored, state = %self.state, "dropping console command");
            return;
        }
        self.transmit(protocol::command_frame(command));
    }

    /// Unexpected loss of the current transport.
    fn lose_transport(&mut self) {
        self.transport = None;
        cancel(&mut self.refresh);
        self.reset_stream();
        if self.connected {
            self.connected = false;
            self.emit(ConsoleEvent::Connection(false));
        }
        self.enter_reconnecting(true);
    }

    fn enter_reconnecting(&mut self, schedule_reconnect: bool) {
        self.set_state(SessionState::Reconnecting);
        if schedule_reconnect {
            self.schedule_reconnect();
        }
        if self.keepalive.is_none() {
            let period = self.options.keepalive_interval;
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.keepalive = Some(interval);
        }
    }

    fn schedule_reconnect(&mut self) {
        cancel(&mut self.reconnect);
        let generation = self.generation;
        let delay = self.options.reconnect_delay;
        let tx = self.internal_tx.clone();
        debug!("reconnecting in {}s", delay.as_secs());
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ReconnectDue { generation });
        }));
    }

    /// Explicit teardown. Idempotent.
    fn halt(&mut self) {
        let was_active = self.state != SessionState::Idle;
        self.generation += 1;
        cancel(&mut self.attempt);
        cancel(&mut self.refresh);
        cancel(&mut self.reconnect);
        self.keepalive = None;
        self.transport = None;
        self.reset_stream();
        if self.connected {
            self.connected = false;
            self.emit(ConsoleEvent::Connection(false));
        }
        self.server = None;
        self.set_state(SessionState::Idle);
        if was_active {
            info!("console session stopped");
        }
    }

    fn reset_stream(&mut self) {
        self.reassembler.clear();
        self.ansi.reset();
    }

    /// Fire-and-forget send on the current transport.
    fn transmit(&mut self, frame: String) {
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.send(frame) {
                warn!("console send failed: {e}");
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "console state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn emit(&self, event: ConsoleEvent) {
        // UI may have gone away; nothing to do then
        let _ = self.events.send(event);
    }
}

fn cancel(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

async fn next_frame(transport: &mut Option<TransportHandle>) -> Option<String> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
