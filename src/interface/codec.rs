//! Wire codec for the radio gateway link.
//!
//! The gateway speaks newline-delimited JSON envelopes in both directions.
//! Inbound frames describe mesh activity (`text`, `nodeinfo`, `telemetry`)
//! plus a one-shot `myinfo` announcing the gateway's own node id. The only
//! outbound frame is `send`.
//!
//! A `text` frame with no `to` field is public/group traffic; the BBS only
//! engages with frames addressed to its own node id.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// One JSON line on the gateway link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// The gateway's own node identity, sent once after connect.
    #[serde(rename = "myinfo")]
    MyInfo { id: String },
    /// Node database update observed on the mesh.
    #[serde(rename = "nodeinfo")]
    NodeInfo {
        id: String,
        short_name: String,
        long_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hw_model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    /// Device metrics for a node.
    Telemetry {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        battery_level: Option<u8>,
    },
    /// Inbound text message. `to == None` means broadcast/group traffic.
    Text {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default)]
        channel: u32,
        payload: String,
    },
    /// Outbound text message. `to == None` broadcasts on `channel`.
    Send {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default)]
        channel: u32,
        payload: String,
        #[serde(default)]
        want_ack: bool,
        /// Topic label for MQTT-bridged gateways.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
}

/// Encode a frame as a single JSON line (newline included).
pub fn encode_frame(frame: &Frame) -> Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line from the gateway. Leading/trailing whitespace is
/// tolerated; empty lines are an error so callers can skip them up front.
pub fn decode_frame(line: &str) -> Result<Frame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("empty frame"));
    }
    serde_json::from_str(trimmed).map_err(|e| anyhow!("bad frame: {}", e))
}

/// Chunk a UTF-8 string into <= `max_bytes` segments without splitting
/// codepoints. Prefers newline boundaries when one falls in the back half
/// of a chunk, then falls back to byte slicing on a char boundary.
pub fn chunk_utf8(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            chunks.push(remaining.to_string());
            break;
        }
        let mut end = max_bytes.min(remaining.len());
        while end > 0 && !remaining.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // max_bytes is smaller than the first codepoint; take it whole
            // rather than looping on empty slices.
            end = remaining
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(remaining.len());
        }
        let slice = &remaining[..end];
        if let Some(pos) = slice.rfind('\n') {
            if pos > 0 && pos + 1 >= end / 2 {
                chunks.push(slice[..=pos].to_string());
                remaining = &remaining[pos + 1..];
                continue;
            }
        }
        chunks.push(slice.to_string());
        remaining = &remaining[end..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trip() {
        let frame = Frame::Text {
            from: "!a1b2c3d4".to_string(),
            to: Some("!0badcafe".to_string()),
            channel: 0,
            payload: "CM".to_string(),
        };
        let line = encode_frame(&frame).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(decode_frame(&line).unwrap(), frame);
    }

    #[test]
    fn broadcast_text_omits_to() {
        let line = r#"{"type":"text","from":"!a1b2c3d4","payload":"hi all"}"#;
        match decode_frame(line).unwrap() {
            Frame::Text { to, channel, .. } => {
                assert!(to.is_none());
                assert_eq!(channel, 0);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn nodeinfo_optional_fields_default() {
        let line = r#"{"type":"nodeinfo","id":"!11223344","short_name":"TST1","long_name":"Test One"}"#;
        match decode_frame(line).unwrap() {
            Frame::NodeInfo { hw_model, role, .. } => {
                assert!(hw_model.is_none());
                assert!(role.is_none());
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn myinfo_and_nodeinfo_use_unbroken_tags() {
        let line = r#"{"type":"myinfo","id":"!deadbeef"}"#;
        match decode_frame(line).unwrap() {
            Frame::MyInfo { id } => assert_eq!(id, "!deadbeef"),
            other => panic!("unexpected frame {:?}", other),
        }
        let frame = Frame::NodeInfo {
            id: "!11223344".to_string(),
            short_name: "TST1".to_string(),
            long_name: "Test One".to_string(),
            hw_model: None,
            role: None,
        };
        let line = encode_frame(&frame).unwrap();
        assert!(line.contains(r#""type":"nodeinfo""#), "got {:?}", line);
        assert_eq!(decode_frame(&line).unwrap(), frame);
    }

    #[test]
    fn garbage_and_empty_lines_fail() {
        assert!(decode_frame("").is_err());
        assert!(decode_frame("   \n").is_err());
        assert!(decode_frame("{not json").is_err());
        assert!(decode_frame(r#"{"type":"warp"}"#).is_err());
    }

    #[test]
    fn chunking_short_text_is_identity() {
        assert_eq!(chunk_utf8("hello", 200), vec!["hello"]);
    }

    #[test]
    fn chunking_never_splits_codepoints() {
        let text = "é".repeat(300); // 600 bytes of two-byte chars
        let chunks = chunk_utf8(&text, 199); // odd limit forces boundary checks
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 199);
            assert!(chunk.chars().all(|c| c == 'é'));
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunking_terminates_when_limit_is_below_one_codepoint() {
        let chunks = chunk_utf8("éé", 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.concat(), "éé");
    }

    #[test]
    fn chunking_prefers_newline_boundaries() {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("line number {}\n", i));
        }
        let chunks = chunk_utf8(&text, 100);
        // All but possibly the last chunk should end on a line break.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('\n'), "chunk missing newline: {:?}", chunk);
        }
        assert_eq!(chunks.concat(), text);
    }
}
