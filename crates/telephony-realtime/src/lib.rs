//! # CRM Telephony Realtime Client
//!
//! Push-style telephony notifications for the CRM dashboard. The server keeps a
//! WebSocket channel per signed-in user and pushes three kinds of events over it:
//!
//! - **incoming_call**: a call is ringing on one of the user's lines
//! - **call_status_changed**: a call moved to ringing/answered/ended/failed
//! - **new_call_record**: a record was added to the call history
//!
//! This crate maintains that channel, decodes the events and hands them to a
//! [`TelephonyEventHandler`]. Transient disconnects are recovered with
//! exponential backoff (2s, 4s, 8s, 16s, 30s); after the last attempt the client
//! gives up until it is told to connect again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crm_telephony_realtime::{CallbackHandler, ClientBuilder, RealtimeConfig, StaticIdentity};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new()
//!         .config(RealtimeConfig::from_env())
//!         .identity(StaticIdentity::new("42"))
//!         .handler(
//!             CallbackHandler::new()
//!                 .on_incoming_call(|call| println!("Incoming call from {}", call.from_number))
//!                 .on_call_status_changed(|status| println!("Call {} is {}", status.call_id, status.status))
//!                 .on_new_call_record(|call_id| println!("Reload history, new call {}", call_id)),
//!         )
//!         .register()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`events`]: wire envelope and event types
//! - [`handler`]: subscriber callbacks and frame dispatch
//! - [`reconnect`]: backoff policy and the connection state machine
//! - [`transport`]: connector/connection seam and the WebSocket implementation
//! - [`client`]: the client itself
//! - [`activity`]: a handler that tracks the current call activity

#![warn(missing_docs)]

pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod identity;
pub mod reconnect;
pub mod transport;

pub use activity::CallBoard;
pub use client::{ClientBuilder, TelephonyRealtimeClient};
pub use config::{AuthToken, RealtimeConfig};
pub use error::{RealtimeError, RealtimeResult};
pub use events::{CallStatus, CallStatusEvent, IncomingCallEvent, TelephonyEvent};
pub use handler::{CallbackHandler, NoopHandler, TelephonyEventHandler};
pub use identity::{IdentityProvider, StaticIdentity};
pub use reconnect::{CloseDecision, ConnectionState, ReconnectMachine, ReconnectPolicy};
pub use transport::{Connection, Connector, Endpoint, Frame, WsConnector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
