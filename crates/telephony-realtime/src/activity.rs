//! Consumer-side view of current call activity
//!
//! [`CallBoard`] is a ready-made handler for screens that show an incoming
//! call prompt, the status of the active call and refresh the call history
//! when the server reports a new record.

use crate::events::{CallStatusEvent, IncomingCallEvent};
use crate::handler::TelephonyEventHandler;
use crate::reconnect::ConnectionState;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
struct Board {
    incoming_call: Option<IncomingCallEvent>,
    active_status: Option<CallStatusEvent>,
    connection: Option<ConnectionState>,
}

/// Latest call activity for one user
#[derive(Debug)]
pub struct CallBoard {
    board: RwLock<Board>,
    history_refreshes: watch::Sender<u64>,
}

impl Default for CallBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl CallBoard {
    /// Empty board
    pub fn new() -> Self {
        let (history_refreshes, _) = watch::channel(0);
        Self {
            board: RwLock::new(Board::default()),
            history_refreshes,
        }
    }

    /// Call currently ringing, if any
    pub fn incoming_call(&self) -> Option<IncomingCallEvent> {
        self.board.read().incoming_call.clone()
    }

    /// Most recent status of the active call
    pub fn active_status(&self) -> Option<CallStatusEvent> {
        self.board.read().active_status.clone()
    }

    /// Last connection state reported by the client
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.board.read().connection
    }

    /// The user answered or rejected the prompt
    pub fn dismiss_incoming(&self) -> Option<IncomingCallEvent> {
        self.board.write().incoming_call.take()
    }

    /// Number of new call records seen, i.e. history reloads requested
    pub fn history_refreshes(&self) -> u64 {
        *self.history_refreshes.borrow()
    }

    /// Wait for history reload requests
    pub fn watch_history(&self) -> watch::Receiver<u64> {
        self.history_refreshes.subscribe()
    }
}

#[async_trait]
impl TelephonyEventHandler for CallBoard {
    async fn on_incoming_call(&self, event: IncomingCallEvent) {
        self.board.write().incoming_call = Some(event);
    }

    async fn on_call_status_changed(&self, event: CallStatusEvent) {
        let mut board = self.board.write();
        let ends_ringing_call = event.status.is_terminal()
            && board
                .incoming_call
                .as_ref()
                .is_some_and(|call| call.call_id == event.call_id);
        if ends_ringing_call {
            board.incoming_call = None;
        }
        board.active_status = Some(event);
    }

    async fn on_new_call_record(&self, _call_id: String) {
        self.history_refreshes.send_modify(|count| *count += 1);
    }

    async fn on_connection_state_changed(&self, state: ConnectionState) {
        self.board.write().connection = Some(state);
    }
}
