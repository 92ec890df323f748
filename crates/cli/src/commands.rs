use crate::render::{self, render_event, render_state};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use crm_telephony_realtime::events::decode_frame;
use crm_telephony_realtime::{
    CallStatusEvent, ClientBuilder, ConnectionState, IncomingCallEvent, RealtimeConfig,
    ReconnectPolicy, StaticIdentity, TelephonyEventHandler,
};
use std::io::{BufRead, Write};
use tracing::info;

/// Prints every event and state change to stdout, one line each
#[derive(Debug, Clone, Copy)]
pub struct EventPrinter {
    json: bool,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

#[async_trait]
impl TelephonyEventHandler for EventPrinter {
    async fn on_incoming_call(&self, event: IncomingCallEvent) {
        println!("{}", render::incoming_call(&event, self.json));
    }

    async fn on_call_status_changed(&self, event: CallStatusEvent) {
        println!("{}", render::call_status(&event, self.json));
    }

    async fn on_new_call_record(&self, call_id: String) {
        println!("{}", render::new_call_record(&call_id, self.json));
    }

    async fn on_connection_state_changed(&self, state: ConnectionState) {
        println!("{}", render_state(state, self.json));
    }
}

/// Stream events for one user until Ctrl-C or until the client gives up
pub async fn watch(config: RealtimeConfig, user_id: String, as_json: bool) -> Result<()> {
    let endpoint = config.endpoint_for(&user_id)?;
    info!("Watching {}", endpoint);

    let client = ClientBuilder::new()
        .config(config)
        .identity(StaticIdentity::new(user_id))
        .handler(EventPrinter::new(as_json))
        .register()
        .context("failed to start realtime client")?;

    let mut states = client.watch_state();
    let gave_up = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            false
        }
        _ = states.wait_for(|s| *s == ConnectionState::GaveUp) => true,
    };

    client.shutdown().await;
    if gave_up {
        bail!("gave up reconnecting to {}", endpoint);
    }
    Ok(())
}

/// Decode one frame per input line; returns how many lines failed
pub fn decode(input: impl BufRead, mut out: impl Write, as_json: bool) -> Result<usize> {
    let mut failures = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        match decode_frame(&line) {
            Ok(event) => writeln!(out, "{}", render_event(&event, as_json))?,
            Err(e) => {
                failures += 1;
                writeln!(out, "line {}: {}", index + 1, e)?;
            }
        }
    }
    Ok(failures)
}

/// Print when each retry would fire
pub fn backoff(policy: &ReconnectPolicy, mut out: impl Write) -> Result<()> {
    let mut elapsed = 0u128;
    for (index, delay) in policy.schedule().into_iter().enumerate() {
        elapsed += delay.as_millis();
        writeln!(
            out,
            "retry {}: wait {} ms (t+{} ms)",
            index + 1,
            delay.as_millis(),
            elapsed
        )?;
    }
    writeln!(out, "then give up")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_telephony_realtime::Frame;
    use crm_telephony_realtime::handler::dispatch_frame;

    #[tokio::test]
    async fn test_printer_receives_dispatched_events() {
        let printer = EventPrinter::new(true);
        for frame in [
            r#"{"type":"incoming_call","payload":{"call_id":"c1","from_number":"+1","to_number":"+2","timestamp":3}}"#,
            r#"{"type":"call_status_changed","payload":{"call_id":"c1","status":"failed"}}"#,
            r#"{"type":"new_call_record","payload":{"call_id":"c1"}}"#,
        ] {
            assert!(dispatch_frame(&printer, &Frame::Text(frame.to_string())).await);
        }
        assert!(!dispatch_frame(&printer, &Frame::Text(r#"{"type":"pong"}"#.to_string())).await);
    }

    #[test]
    fn test_decode_counts_failures() {
        let input = concat!(
            "{\"type\":\"new_call_record\",\"payload\":{\"call_id\":\"c1\"}}\n",
            "\n",
            "not json\n",
            "{\"type\":\"call_status_changed\",\"payload\":{\"call_id\":\"c1\",\"status\":\"answered\"}}\n",
        );
        let mut out = Vec::new();
        let failures = decode(input.as_bytes(), &mut out, false).unwrap();
        assert_eq!(failures, 1);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "new call record c1");
        assert!(lines[1].starts_with("line 3: "));
        assert_eq!(lines[2], "call c1 answered");
    }

    #[test]
    fn test_backoff_prints_default_schedule() {
        let mut out = Vec::new();
        backoff(&ReconnectPolicy::default(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "retry 1: wait 2000 ms (t+2000 ms)\n\
             retry 2: wait 4000 ms (t+6000 ms)\n\
             retry 3: wait 8000 ms (t+14000 ms)\n\
             retry 4: wait 16000 ms (t+30000 ms)\n\
             retry 5: wait 30000 ms (t+60000 ms)\n\
             then give up\n"
        );
    }

    #[test]
    fn test_backoff_with_no_retries() {
        let mut out = Vec::new();
        backoff(&ReconnectPolicy::default().with_max_attempts(0), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "then give up\n");
    }
}
