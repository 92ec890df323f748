//! Subscriber callbacks and frame dispatch
//!
//! Implement [`TelephonyEventHandler`] to receive events; every method has a
//! no-op default so a subscriber only overrides what it cares about. For
//! closure-style registration use [`CallbackHandler`].
//!
//! # Examples
//!
//! ```rust
//! use crm_telephony_realtime::handler::CallbackHandler;
//!
//! let handler = CallbackHandler::new()
//!     .on_incoming_call(|call| println!("{} is calling", call.from_number))
//!     .on_new_call_record(|call_id| println!("history has {}", call_id));
//! # let _ = handler;
//! ```

use crate::events::{
    decode_binary_frame, decode_frame, CallStatusEvent, IncomingCallEvent, TelephonyEvent,
};
use crate::reconnect::ConnectionState;
use crate::transport::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Receives telephony events from the realtime client
#[async_trait]
pub trait TelephonyEventHandler: Send + Sync {
    /// A call is ringing
    async fn on_incoming_call(&self, _event: IncomingCallEvent) {}

    /// A call changed status
    async fn on_call_status_changed(&self, _event: CallStatusEvent) {}

    /// A new record was added to the call history
    async fn on_new_call_record(&self, _call_id: String) {}

    /// The connection moved to a new lifecycle state
    async fn on_connection_state_changed(&self, _state: ConnectionState) {}
}

/// Handler that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl TelephonyEventHandler for NoopHandler {}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handler built from optional closures
#[derive(Clone, Default)]
pub struct CallbackHandler {
    incoming_call: Option<Callback<IncomingCallEvent>>,
    call_status_changed: Option<Callback<CallStatusEvent>>,
    new_call_record: Option<Callback<String>>,
    connection_state_changed: Option<Callback<ConnectionState>>,
}

impl CallbackHandler {
    /// Handler with no callbacks registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the incoming-call callback
    pub fn on_incoming_call(mut self, f: impl Fn(IncomingCallEvent) + Send + Sync + 'static) -> Self {
        self.incoming_call = Some(Arc::new(f));
        self
    }

    /// Register the call-status callback
    pub fn on_call_status_changed(mut self, f: impl Fn(CallStatusEvent) + Send + Sync + 'static) -> Self {
        self.call_status_changed = Some(Arc::new(f));
        self
    }

    /// Register the new-call-record callback
    pub fn on_new_call_record(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.new_call_record = Some(Arc::new(f));
        self
    }

    /// Register the connection-state callback
    pub fn on_connection_state_changed(
        mut self,
        f: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.connection_state_changed = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("incoming_call", &self.incoming_call.is_some())
            .field("call_status_changed", &self.call_status_changed.is_some())
            .field("new_call_record", &self.new_call_record.is_some())
            .field("connection_state_changed", &self.connection_state_changed.is_some())
            .finish()
    }
}

#[async_trait]
impl TelephonyEventHandler for CallbackHandler {
    async fn on_incoming_call(&self, event: IncomingCallEvent) {
        if let Some(callback) = &self.incoming_call {
            callback(event);
        }
    }

    async fn on_call_status_changed(&self, event: CallStatusEvent) {
        if let Some(callback) = &self.call_status_changed {
            callback(event);
        }
    }

    async fn on_new_call_record(&self, call_id: String) {
        if let Some(callback) = &self.new_call_record {
            callback(call_id);
        }
    }

    async fn on_connection_state_changed(&self, state: ConnectionState) {
        if let Some(callback) = &self.connection_state_changed {
            callback(state);
        }
    }
}

/// Route a decoded event to the handler.
///
/// Returns `true` when a handler method was invoked.
pub async fn dispatch_event(handler: &dyn TelephonyEventHandler, event: TelephonyEvent) -> bool {
    match event {
        TelephonyEvent::IncomingCall(event) => {
            debug!("Incoming call {} from {}", event.call_id, event.from_number);
            handler.on_incoming_call(event).await;
            true
        }
        TelephonyEvent::CallStatusChanged(event) => {
            debug!("Call {} is now {}", event.call_id, event.status);
            handler.on_call_status_changed(event).await;
            true
        }
        TelephonyEvent::NewCallRecord { call_id } => {
            debug!("New call record {}", call_id);
            handler.on_new_call_record(call_id).await;
            true
        }
        TelephonyEvent::Connected { user_id } => {
            debug!("Server acknowledged subscription for user {:?}", user_id);
            false
        }
        TelephonyEvent::Pong => {
            trace!("Heartbeat pong");
            false
        }
        TelephonyEvent::Unknown { kind } => {
            debug!("Ignoring unknown message type: {}", kind);
            false
        }
    }
}

/// Decode one data frame and route it to the handler.
///
/// Malformed frames are logged and dropped; this never fails. Close frames are
/// not data and are ignored here.
pub async fn dispatch_frame(handler: &dyn TelephonyEventHandler, frame: &Frame) -> bool {
    let decoded = match frame {
        Frame::Text(text) => decode_frame(text),
        Frame::Binary(data) => decode_binary_frame(data),
        Frame::Close(_) => return false,
    };

    match decoded {
        Ok(event) => dispatch_event(handler, event).await,
        Err(e) => {
            warn!("Dropping telephony message: {}", e);
            false
        }
    }
}
