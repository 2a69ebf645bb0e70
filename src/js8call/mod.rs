//! JS8Call HF bridge.
//!
//! JS8Call exposes a TCP API that emits newline-delimited JSON events. The
//! bridge connects to it, watches for `RX.DIRECTED` traffic, and hands the
//! parsed messages to the server, which files them into the urgent/group/
//! station buckets and broadcasts urgent ones onto the mesh. The connection
//! is retried forever with a fixed backoff; HF rigs come and go.

use anyhow::Result;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::config::Js8CallConfig;
use crate::logutil::truncate_for_log;
use crate::storage::Js8Bucket;

const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// One directed message heard on HF.
#[derive(Debug, Clone, PartialEq)]
pub struct Js8Event {
    pub sender: String,
    pub target: String,
    pub body: String,
}

/// Decide which bucket a directed message belongs in, or `None` when the
/// config says not to keep it.
pub fn classify(cfg: &Js8CallConfig, target: &str) -> Option<Js8Bucket> {
    if cfg.js8urgent.iter().any(|g| g.eq_ignore_ascii_case(target)) {
        Some(Js8Bucket::Urgent)
    } else if cfg.js8groups.iter().any(|g| g.eq_ignore_ascii_case(target)) {
        Some(Js8Bucket::Groups)
    } else if cfg.store_messages {
        Some(Js8Bucket::Messages)
    } else {
        None
    }
}

/// Parse the `value` field of an `RX.DIRECTED` event. The wire form is
/// `SENDER: TARGET body...`, e.g. `KN4ABC: @MESH anyone around?`.
pub fn parse_directed(value: &str) -> Option<Js8Event> {
    let (sender, rest) = value.split_once(':')?;
    let rest = rest.trim_start();
    let (target, body) = match rest.split_once(' ') {
        Some((target, body)) => (target, body.trim()),
        None => (rest, ""),
    };
    let sender = sender.trim();
    if sender.is_empty() || target.is_empty() {
        return None;
    }
    Some(Js8Event {
        sender: sender.to_string(),
        target: target.to_string(),
        body: body.to_string(),
    })
}

fn event_from_line(line: &str) -> Option<Js8Event> {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            debug!(
                "unparseable JS8Call event: {} ({})",
                e,
                truncate_for_log(line, 120)
            );
            return None;
        }
    };
    if parsed.get("type").and_then(Value::as_str) != Some("RX.DIRECTED") {
        return None;
    }
    let value = parsed.get("value").and_then(Value::as_str)?;
    parse_directed(value)
}

/// Connect to the JS8Call API and forward directed messages until the
/// receiver side goes away. Reconnects on any socket error.
pub async fn run_bridge(cfg: Js8CallConfig, tx: mpsc::UnboundedSender<Js8Event>) {
    let addr = format!("{}:{}", cfg.host, cfg.port);
    loop {
        match read_loop(&addr, &tx).await {
            Ok(()) => {
                // Receiver dropped; the server is shutting down.
                return;
            }
            Err(e) => {
                warn!("JS8Call link to {} failed: {}; retrying", addr, e);
            }
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn read_loop(addr: &str, tx: &mpsc::UnboundedSender<Js8Event>) -> Result<()> {
    let stream = TcpStream::connect(addr).await?;
    info!("connected to JS8Call at {}", addr);
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(event) = event_from_line(&line) {
            debug!(
                "JS8Call directed message from {} to {}",
                event.sender, event.target
            );
            if tx.send(event).is_err() {
                return Ok(());
            }
        }
    }
    anyhow::bail!("JS8Call closed the connection")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(groups: &[&str], urgent: &[&str], store: bool) -> Js8CallConfig {
        Js8CallConfig {
            host: "localhost".to_string(),
            port: 2442,
            store_messages: store,
            js8groups: groups.iter().map(|s| s.to_string()).collect(),
            js8urgent: urgent.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn directed_value_parses_sender_target_body() {
        let event = parse_directed("KN4ABC: @MESH anyone around?").unwrap();
        assert_eq!(event.sender, "KN4ABC");
        assert_eq!(event.target, "@MESH");
        assert_eq!(event.body, "anyone around?");

        // A bare check-in with no body is still a valid event.
        let event = parse_directed("KN4ABC: @HB").unwrap();
        assert_eq!(event.target, "@HB");
        assert_eq!(event.body, "");

        assert_eq!(parse_directed("no separator here"), None);
    }

    #[test]
    fn classification_prefers_urgent_over_group() {
        let cfg = config(&["@MESH", "@NET"], &["@MESH"], true);
        assert_eq!(classify(&cfg, "@MESH"), Some(Js8Bucket::Urgent));
        assert_eq!(classify(&cfg, "@net"), Some(Js8Bucket::Groups));
        assert_eq!(classify(&cfg, "KN4ABC"), Some(Js8Bucket::Messages));
    }

    #[test]
    fn station_traffic_dropped_when_store_disabled() {
        let cfg = config(&["@MESH"], &[], false);
        assert_eq!(classify(&cfg, "KN4ABC"), None);
        assert_eq!(classify(&cfg, "@MESH"), Some(Js8Bucket::Groups));
    }

    #[test]
    fn only_rx_directed_events_are_forwarded() {
        assert!(event_from_line(r#"{"type":"RX.SPOT","value":"KN4ABC"}"#).is_none());
        assert!(event_from_line("not json at all").is_none());
        let event = event_from_line(
            r#"{"type":"RX.DIRECTED","value":"KN4ABC: @MESH checking in","params":{}}"#,
        )
        .unwrap();
        assert_eq!(event.sender, "KN4ABC");
    }
}
