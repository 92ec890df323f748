//! Scripted in-memory transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use crm_telephony_realtime::{
    CallbackHandler, ConnectionState, Connection, Connector, Endpoint, Frame, RealtimeError,
    RealtimeResult,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// What the fake server does with the next connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Refuse,
    Accept,
}

struct Shared {
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    attempts: Mutex<Vec<Instant>>,
    urls: Mutex<Vec<String>>,
    cookies: Mutex<Vec<Option<String>>>,
    sent: Mutex<Vec<String>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    accepted: mpsc::UnboundedSender<ServerHandle>,
}

/// Connector whose attempts follow a script; attempts past the script use the fallback
#[derive(Clone)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new(
        script: impl IntoIterator<Item = Behavior>,
        fallback: Behavior,
    ) -> (Self, mpsc::UnboundedReceiver<ServerHandle>) {
        let (accepted, servers) = mpsc::unbounded_channel();
        let shared = Shared {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
            accepted,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            servers,
        )
    }

    pub fn refusing() -> (Self, mpsc::UnboundedReceiver<ServerHandle>) {
        Self::new([], Behavior::Refuse)
    }

    pub fn accepting() -> (Self, mpsc::UnboundedReceiver<ServerHandle>) {
        Self::new([], Behavior::Accept)
    }

    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.lock().len()
    }

    /// Gaps between consecutive connection attempts
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        let attempts = self.shared.attempts.lock();
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.shared.urls.lock().clone()
    }

    /// Cookie presented with each attempt
    pub fn cookies(&self) -> Vec<Option<String>> {
        self.shared.cookies.lock().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().clone()
    }

    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.shared.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &Endpoint) -> RealtimeResult<Box<dyn Connection>> {
        let url = &endpoint.url;
        self.shared.attempts.lock().push(Instant::now());
        self.shared.urls.lock().push(url.to_string());
        self.shared
            .cookies
            .lock()
            .push(endpoint.auth_token.as_ref().map(|token| token.cookie()));

        let behavior = self
            .shared
            .script
            .lock()
            .pop_front()
            .unwrap_or(self.shared.fallback);
        if behavior == Behavior::Refuse {
            return Err(RealtimeError::connect_failed(url.as_str(), "connection refused"));
        }

        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_live.fetch_max(live, Ordering::SeqCst);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let _ = self.shared.accepted.send(ServerHandle { frames: frames_tx });
        Ok(Box::new(ScriptedConnection {
            frames: frames_rx,
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    frames: mpsc::UnboundedReceiver<RealtimeResult<Frame>>,
    shared: Arc<Shared>,
    closed: bool,
}

impl ScriptedConnection {
    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn next_frame(&mut self) -> Option<RealtimeResult<Frame>> {
        if self.closed {
            return None;
        }
        match self.frames.recv().await {
            Some(frame) => Some(frame),
            None => {
                self.mark_closed();
                None
            }
        }
    }

    async fn send_text(&mut self, text: String) -> RealtimeResult<()> {
        if self.closed {
            return Err(RealtimeError::TransportClosed);
        }
        self.shared.sent.lock().push(text);
        Ok(())
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.mark_closed();
        Ok(())
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

/// Server side of one accepted connection
pub struct ServerHandle {
    frames: mpsc::UnboundedSender<RealtimeResult<Frame>>,
}

impl ServerHandle {
    pub fn send_text(&self, text: &str) {
        let _ = self.frames.send(Ok(Frame::Text(text.to_string())));
    }

    pub fn send_error(&self, message: &str) {
        let _ = self.frames.send(Err(RealtimeError::transport(message)));
    }

    /// Close the channel from the server side
    pub fn close(self) {
        let _ = self.frames.send(Ok(Frame::Close(Some("going away".to_string()))));
    }

    /// Drop the channel without a close frame
    pub fn vanish(self) {}
}

/// Handler that records every connection state it is told about
pub fn state_recorder() -> (CallbackHandler, Arc<Mutex<Vec<ConnectionState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let handler =
        CallbackHandler::new().on_connection_state_changed(move |state| sink.lock().push(state));
    (handler, states)
}

pub async fn wait_for_state(states: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(600), states.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", want))
        .expect("state channel closed");
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerHandle>) -> ServerHandle {
    tokio::time::timeout(Duration::from_secs(600), servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Let spawned tasks run without advancing past any pending retry
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("crm_telephony_realtime=debug")
        .with_test_writer()
        .try_init();
}
