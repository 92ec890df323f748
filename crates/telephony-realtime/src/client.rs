//! The realtime telephony client
//!
//! [`TelephonyRealtimeClient`] keeps one logical event channel open for the
//! current user and recovers from transient disconnects with exponential
//! backoff. Its lifetime is the subscriber's: dropping the client tears the
//! channel down and cancels any pending retry.
//!
//! # Architecture
//!
//! ```text
//!  connect()/disconnect()          session task (one per live session)
//!  ──────────────────────          ──────────────────────────────────
//!  lock slot ─▶ ReconnectMachine   open transport ─▶ on_open()
//!           ─▶ bump generation     pump frames    ─▶ dispatch to handler
//!           ─▶ spawn / signal      on close       ─▶ on_close() ─▶ sleep ─▶ retry
//! ```
//!
//! The session task owns the transport and the retry timer. Every state change
//! it makes is checked against the session generation, so a task that was
//! disconnected can never reopen a transport. A new session waits for the
//! previous task to finish before opening, so at most one transport is live.
//!
//! # Examples
//!
//! ```rust,no_run
//! use crm_telephony_realtime::{CallbackHandler, ClientBuilder, RealtimeConfig, StaticIdentity};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::new()
//!     .config(RealtimeConfig::from_env())
//!     .identity(StaticIdentity::new("42"))
//!     .handler(
//!         CallbackHandler::new()
//!             .on_incoming_call(|call| println!("{} is calling", call.from_number)),
//!     )
//!     .register()?;
//!
//! // ... later, when the owner goes away
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::events::encode_ping;
use crate::handler::{dispatch_frame, NoopHandler, TelephonyEventHandler};
use crate::identity::{self, IdentityProvider};
use crate::reconnect::{CloseDecision, ConnectionState, ReconnectMachine};
use crate::transport::{Connection, Connector, Frame, WsConnector};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Builder for [`TelephonyRealtimeClient`]
pub struct ClientBuilder {
    config: RealtimeConfig,
    identity: Option<Arc<dyn IdentityProvider>>,
    handler: Arc<dyn TelephonyEventHandler>,
    connector: Arc<dyn Connector>,
    enabled: bool,
}

impl ClientBuilder {
    /// Builder with the default configuration, a no-op handler and the WebSocket connector
    pub fn new() -> Self {
        Self {
            config: RealtimeConfig::default(),
            identity: None,
            handler: Arc::new(NoopHandler),
            connector: Arc::new(WsConnector::new()),
            enabled: true,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: RealtimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the identity provider (required)
    pub fn identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Set a shared identity provider (required)
    pub fn shared_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the event handler
    pub fn handler(mut self, handler: impl TelephonyEventHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Set a shared event handler the caller keeps a reference to
    pub fn shared_handler(mut self, handler: Arc<dyn TelephonyEventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replace the transport connector
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Set a shared transport connector
    pub fn shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Initial value of the enabled flag (default `true`)
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build the client without connecting.
    ///
    /// Must be called from within a tokio runtime; the client spawns its session
    /// tasks on that runtime.
    pub fn build(self) -> RealtimeResult<TelephonyRealtimeClient> {
        self.config.validate()?;
        let identity = self
            .identity
            .ok_or_else(|| RealtimeError::config("an identity provider is required"))?;
        let runtime = Handle::try_current()
            .map_err(|_| RealtimeError::config("the client must be built inside a tokio runtime"))?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (state_events, state_rx) = mpsc::unbounded_channel();
        runtime.spawn(forward_state_changes(self.handler.clone(), state_rx));

        let machine = ReconnectMachine::new(self.config.reconnect);
        let inner = ClientInner {
            config: self.config,
            identity,
            handler: self.handler,
            connector: self.connector,
            enabled: AtomicBool::new(self.enabled),
            slot: Mutex::new(SessionSlot {
                machine,
                generation: 0,
                session: None,
                retired: Vec::new(),
            }),
            state_tx,
            state_events,
            runtime,
        };

        Ok(TelephonyRealtimeClient {
            inner: Arc::new(inner),
        })
    }

    /// Build the client and connect right away if it is enabled
    pub fn register(self) -> RealtimeResult<TelephonyRealtimeClient> {
        let client = self.build()?;
        if client.is_enabled() {
            client.connect();
        }
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Realtime telephony event client for one user
pub struct TelephonyRealtimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: RealtimeConfig,
    identity: Arc<dyn IdentityProvider>,
    handler: Arc<dyn TelephonyEventHandler>,
    connector: Arc<dyn Connector>,
    enabled: AtomicBool,
    slot: Mutex<SessionSlot>,
    state_tx: watch::Sender<ConnectionState>,
    state_events: mpsc::UnboundedSender<ConnectionState>,
    runtime: Handle,
}

struct SessionSlot {
    machine: ReconnectMachine,
    generation: u64,
    session: Option<Session>,
    /// Tasks that were told to stop but may still be closing their transport
    retired: Vec<JoinHandle<()>>,
}

struct Session {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SessionSlot {
    fn retire_session(&mut self) {
        if let Some(session) = self.session.take() {
            // The task may already be gone; nobody listening is fine.
            let _ = session.shutdown.send(());
            self.retired.push(session.task);
        }
    }
}

impl ClientInner {
    fn publish(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        self.state_tx.send_replace(state);
        let _ = self.state_events.send(state);
    }

    /// Apply a transition on behalf of session `generation`; false if the session is stale
    fn transition(
        &self,
        generation: u64,
        f: impl FnOnce(&mut ReconnectMachine) -> ConnectionState,
    ) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        let state = f(&mut slot.machine);
        self.publish(state);
        true
    }

    fn close_decision(&self, generation: u64) -> Option<CloseDecision> {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return None;
        }
        let decision = slot.machine.on_close();
        self.publish(slot.machine.state());
        Some(decision)
    }
}

impl TelephonyRealtimeClient {
    /// Start building a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Open the event channel for the current user.
    ///
    /// Returns immediately. Does nothing when the client is disabled, when no
    /// user id is available (a warning is logged and no attempt is consumed),
    /// or when a transport is already connecting or open. A pending retry is
    /// canceled and replaced by an immediate attempt. The attempt counter is
    /// only reset by a confirmed open.
    pub fn connect(&self) {
        let inner = &self.inner;
        if !self.is_enabled() {
            debug!("Telephony realtime client is disabled, not connecting");
            return;
        }

        let Some(user_id) = identity::resolve(inner.identity.as_ref()) else {
            warn!("Telephony WebSocket: no user ID found, not connecting");
            return;
        };
        if let Err(e) = inner.config.endpoint(&user_id) {
            error!("Telephony WebSocket: cannot build endpoint: {}", e);
            return;
        }

        let mut slot = inner.slot.lock();
        match slot.machine.state() {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!("Telephony WebSocket already {}, connect ignored", slot.machine.state());
                return;
            }
            ConnectionState::Reconnecting(attempt) => {
                debug!("Canceling scheduled retry {} for an immediate connect", attempt);
            }
            ConnectionState::Disconnected | ConnectionState::GaveUp => {}
        }
        // A session that gave up has already finished; retiring it is a no-op wait
        slot.retire_session();

        slot.generation += 1;
        let generation = slot.generation;
        let previous = std::mem::take(&mut slot.retired);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let state = slot.machine.begin_connect();
        inner.publish(state);

        let task = inner.runtime.spawn(run_session(
            self.inner.clone(),
            generation,
            shutdown_rx,
            previous,
        ));
        slot.session = Some(Session {
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Cancel any pending retry and close the transport. Idempotent.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let mut slot = inner.slot.lock();
        slot.generation += 1;
        slot.retire_session();
        if slot.machine.state() != ConnectionState::Disconnected {
            debug!("Telephony WebSocket disconnect from {}", slot.machine.state());
            let state = slot.machine.on_disconnect();
            inner.publish(state);
        }
    }

    /// Disconnect and wait until the transport is closed
    pub async fn shutdown(&self) {
        self.disconnect();
        let tasks = std::mem::take(&mut self.inner.slot.lock().retired);
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Enable or disable the client; enabling connects, disabling disconnects
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if enabled {
            if !was {
                info!("Telephony realtime client enabled");
            }
            self.connect();
        } else {
            if was {
                info!("Telephony realtime client disabled");
            }
            self.disconnect();
        }
    }

    /// Whether the client is enabled
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// The signed-in user changed: reconnect under the new identity
    pub fn identity_changed(&self) {
        self.disconnect();
        self.connect();
    }

    /// Whether the transport is open right now
    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().machine.state()
    }

    /// Reconnect attempts consumed since the last confirmed open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.slot.lock().machine.attempts()
    }

    /// Watch lifecycle state changes, e.g. for a "realtime offline" indicator
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The configuration in use
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }
}

impl Drop for TelephonyRealtimeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for TelephonyRealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelephonyRealtimeClient")
            .field("config", &self.inner.config)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}

async fn forward_state_changes(
    handler: Arc<dyn TelephonyEventHandler>,
    mut states: mpsc::UnboundedReceiver<ConnectionState>,
) {
    while let Some(state) = states.recv().await {
        let notified = AssertUnwindSafe(handler.on_connection_state_changed(state))
            .catch_unwind()
            .await;
        if notified.is_err() {
            error!("Telephony handler panicked on state change to {}", state);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpOutcome {
    /// Told to stop
    Shutdown,
    /// Peer closed or the transport died
    Closed,
}

async fn run_session(
    inner: Arc<ClientInner>,
    generation: u64,
    mut shutdown: oneshot::Receiver<()>,
    previous: Vec<JoinHandle<()>>,
) {
    for task in previous {
        let _ = task.await;
    }

    loop {
        // Identity is re-read on every attempt, like an explicit connect would
        let Some(user_id) = identity::resolve(inner.identity.as_ref()) else {
            warn!("Telephony WebSocket: no user ID found, dropping reconnection");
            inner.transition(generation, |m| m.on_disconnect());
            return;
        };
        let endpoint = match inner.config.endpoint(&user_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("Telephony WebSocket: cannot build endpoint: {}", e);
                inner.transition(generation, |m| m.on_disconnect());
                return;
            }
        };

        let opened = tokio::select! {
            biased;
            _ = &mut shutdown => return,
            opened = inner.connector.connect(&endpoint) => opened,
        };

        match opened {
            Ok(mut connection) => {
                if !inner.transition(generation, |m| m.on_open()) {
                    let _ = connection.close().await;
                    return;
                }
                info!("Telephony WebSocket connected for user {}", user_id);

                let outcome = pump(&inner, connection.as_mut(), &mut shutdown).await;
                if let Err(e) = connection.close().await {
                    debug!("Telephony WebSocket close: {}", e);
                }
                if outcome == PumpOutcome::Shutdown {
                    info!("Telephony WebSocket closed");
                    return;
                }
                info!("Telephony WebSocket disconnected");
            }
            Err(e) => {
                error!("Telephony WebSocket connection error: {}", e);
            }
        }

        match inner.close_decision(generation) {
            None => return,
            Some(CloseDecision::Retry { attempt, delay }) => {
                info!(
                    "Telephony WebSocket reconnecting in {}ms (attempt {})",
                    delay.as_millis(),
                    attempt
                );
                tokio::select! {
                    biased;
                    _ = &mut shutdown => return,
                    _ = sleep(delay) => {}
                }
                if !inner.transition(generation, |m| m.begin_connect()) {
                    return;
                }
            }
            Some(CloseDecision::GiveUp) => {
                error!("Telephony WebSocket: max reconnection attempts reached");
                return;
            }
        }
    }
}

async fn pump(
    inner: &ClientInner,
    connection: &mut dyn Connection,
    shutdown: &mut oneshot::Receiver<()>,
) -> PumpOutcome {
    let mut heartbeat = inner.config.heartbeat_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown => return PumpOutcome::Shutdown,
            _ = next_tick(&mut heartbeat) => {
                if let Err(e) = connection.send_text(encode_ping()).await {
                    warn!("Telephony WebSocket heartbeat failed: {}", e);
                }
            }
            frame = connection.next_frame() => match frame {
                None => return PumpOutcome::Closed,
                Some(Ok(Frame::Close(reason))) => {
                    debug!("Telephony WebSocket close frame: {:?}", reason);
                    return PumpOutcome::Closed;
                }
                Some(Ok(frame)) => {
                    // A panicking subscriber loses the message, not the connection
                    let dispatched = AssertUnwindSafe(dispatch_frame(inner.handler.as_ref(), &frame))
                        .catch_unwind()
                        .await;
                    if dispatched.is_err() {
                        error!("Telephony handler panicked, message dropped");
                    }
                }
                // The close that follows drives recovery
                Some(Err(e)) => {
                    error!("Telephony WebSocket error: {}", e);
                }
            }
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
