//! Text and JSON rendering of events for the terminal

use crm_telephony_realtime::events::{CALL_STATUS_CHANGED, INCOMING_CALL, NEW_CALL_RECORD};
use crm_telephony_realtime::{CallStatusEvent, ConnectionState, IncomingCallEvent, TelephonyEvent};
use serde_json::{Value, json};

pub fn incoming_call(call: &IncomingCallEvent, as_json: bool) -> String {
    if as_json {
        json!({ "type": INCOMING_CALL, "payload": call }).to_string()
    } else {
        format!(
            "incoming call {} from {} to {} at {}",
            call.call_id, call.from_number, call.to_number, call.timestamp
        )
    }
}

pub fn call_status(status: &CallStatusEvent, as_json: bool) -> String {
    if as_json {
        return json!({ "type": CALL_STATUS_CHANGED, "payload": status }).to_string();
    }
    match status.duration {
        Some(secs) => format!("call {} {} after {}s", status.call_id, status.status, secs),
        None => format!("call {} {}", status.call_id, status.status),
    }
}

pub fn new_call_record(call_id: &str, as_json: bool) -> String {
    if as_json {
        json!({ "type": NEW_CALL_RECORD, "payload": { "call_id": call_id } }).to_string()
    } else {
        format!("new call record {}", call_id)
    }
}

fn other_event_json(event: &TelephonyEvent) -> Value {
    match event {
        TelephonyEvent::Connected { user_id } => json!({ "type": event.kind(), "user_id": user_id }),
        _ => json!({ "type": event.kind() }),
    }
}

fn other_event_text(event: &TelephonyEvent) -> String {
    match event {
        TelephonyEvent::Connected { user_id: Some(user) } => format!("subscribed as {}", user),
        TelephonyEvent::Connected { user_id: None } => "subscribed".to_string(),
        TelephonyEvent::Unknown { kind } => format!("unknown event type {:?}", kind),
        _ => event.kind().to_string(),
    }
}

pub fn render_event(event: &TelephonyEvent, as_json: bool) -> String {
    match event {
        TelephonyEvent::IncomingCall(call) => incoming_call(call, as_json),
        TelephonyEvent::CallStatusChanged(status) => call_status(status, as_json),
        TelephonyEvent::NewCallRecord { call_id } => new_call_record(call_id, as_json),
        other if as_json => other_event_json(other).to_string(),
        other => other_event_text(other),
    }
}

pub fn render_state(state: ConnectionState, as_json: bool) -> String {
    if as_json {
        json!({ "type": "connection_state", "state": state.to_string() }).to_string()
    } else {
        format!("connection {}", state)
    }
}
