//! Store-and-forward synchronization between federated boards.
//!
//! Peer stations exchange pipe-delimited frames as direct messages:
//!
//! ```text
//! BULLETIN|board|author|subject|content|unique_id
//! MAIL|sender|author|recipient|subject|content|unique_id
//! DELETE_BULLETIN|unique_id
//! DELETE_MAIL|unique_id
//! CHANNEL|name|url
//! ```
//!
//! The `|` character is rejected by input validation, so a plain split is
//! unambiguous. Frames are only honored when they arrive from a configured
//! peer; applying one is idempotent on the unique id, so a frame that loops
//! back or is replayed changes nothing and is never re-forwarded.

use chrono::Utc;
use log::debug;

use crate::interface::OutgoingMessage;
use crate::storage::{BulletinRecord, ChannelRecord, MailRecord, Storage, StorageResult};

/// One synchronization frame between peer stations.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncFrame {
    Bulletin {
        board: String,
        author: String,
        subject: String,
        content: String,
        unique_id: String,
    },
    Mail {
        sender: String,
        author: String,
        recipient: String,
        subject: String,
        content: String,
        unique_id: String,
    },
    DeleteBulletin {
        unique_id: String,
    },
    DeleteMail {
        unique_id: String,
    },
    Channel {
        name: String,
        url: String,
    },
}

const SYNC_PREFIXES: [&str; 5] = [
    "BULLETIN|",
    "MAIL|",
    "DELETE_BULLETIN|",
    "DELETE_MAIL|",
    "CHANNEL|",
];

/// Quick check whether a payload even looks like a sync frame.
pub fn is_sync_payload(text: &str) -> bool {
    SYNC_PREFIXES.iter().any(|p| text.starts_with(p))
}

impl SyncFrame {
    /// Parse a frame, returning `None` for anything malformed. Callers log
    /// and drop bad frames rather than replying to a peer.
    pub fn parse(text: &str) -> Option<SyncFrame> {
        let parts: Vec<&str> = text.split('|').collect();
        match parts.as_slice() {
            ["BULLETIN", board, author, subject, content, unique_id] => {
                Some(SyncFrame::Bulletin {
                    board: board.to_string(),
                    author: author.to_string(),
                    subject: subject.to_string(),
                    content: content.to_string(),
                    unique_id: unique_id.to_string(),
                })
            }
            ["MAIL", sender, author, recipient, subject, content, unique_id] => {
                Some(SyncFrame::Mail {
                    sender: sender.to_string(),
                    author: author.to_string(),
                    recipient: recipient.to_string(),
                    subject: subject.to_string(),
                    content: content.to_string(),
                    unique_id: unique_id.to_string(),
                })
            }
            ["DELETE_BULLETIN", unique_id] => Some(SyncFrame::DeleteBulletin {
                unique_id: unique_id.to_string(),
            }),
            ["DELETE_MAIL", unique_id] => Some(SyncFrame::DeleteMail {
                unique_id: unique_id.to_string(),
            }),
            ["CHANNEL", name, url] => Some(SyncFrame::Channel {
                name: name.to_string(),
                url: url.to_string(),
            }),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SyncFrame::Bulletin {
                board,
                author,
                subject,
                content,
                unique_id,
            } => format!(
                "BULLETIN|{}|{}|{}|{}|{}",
                board, author, subject, flatten(content), unique_id
            ),
            SyncFrame::Mail {
                sender,
                author,
                recipient,
                subject,
                content,
                unique_id,
            } => format!(
                "MAIL|{}|{}|{}|{}|{}|{}",
                sender, author, recipient, subject, flatten(content), unique_id
            ),
            SyncFrame::DeleteBulletin { unique_id } => {
                format!("DELETE_BULLETIN|{}", unique_id)
            }
            SyncFrame::DeleteMail { unique_id } => format!("DELETE_MAIL|{}", unique_id),
            SyncFrame::Channel { name, url } => format!("CHANNEL|{}|{}", name, url),
        }
    }
}

// Frames are single-line on the air.
fn flatten(content: &str) -> String {
    content.replace(['\r', '\n'], " ")
}

/// The result of applying a frame to local storage. `origin` names who to
/// notify; duplicates mean the frame was already seen and must not fan out
/// again.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncApply {
    NewBulletin(BulletinRecord),
    NewMail(MailRecord),
    Duplicate,
    Deleted,
    NotFound,
    ChannelAdded,
    ChannelExists,
}

/// Apply a parsed frame to the local store.
pub fn apply(frame: &SyncFrame, storage: &Storage) -> StorageResult<SyncApply> {
    match frame {
        SyncFrame::Bulletin {
            board,
            author,
            subject,
            content,
            unique_id,
        } => {
            let record = BulletinRecord {
                unique_id: unique_id.clone(),
                board: board.clone(),
                sender_short_name: author.clone(),
                subject: subject.clone(),
                content: content.clone(),
                timestamp: Utc::now(),
            };
            if storage.add_bulletin(&record)? {
                Ok(SyncApply::NewBulletin(record))
            } else {
                Ok(SyncApply::Duplicate)
            }
        }
        SyncFrame::Mail {
            sender,
            author,
            recipient,
            subject,
            content,
            unique_id,
        } => {
            let record = MailRecord {
                unique_id: unique_id.clone(),
                sender: sender.clone(),
                sender_short_name: author.clone(),
                recipient: recipient.clone(),
                subject: subject.clone(),
                content: content.clone(),
                timestamp: Utc::now(),
            };
            if storage.add_mail(&record)? {
                Ok(SyncApply::NewMail(record))
            } else {
                Ok(SyncApply::Duplicate)
            }
        }
        SyncFrame::DeleteBulletin { unique_id } => {
            if storage.delete_bulletin(unique_id)? {
                Ok(SyncApply::Deleted)
            } else {
                Ok(SyncApply::NotFound)
            }
        }
        SyncFrame::DeleteMail { unique_id } => {
            if storage.delete_mail(unique_id)? {
                Ok(SyncApply::Deleted)
            } else {
                Ok(SyncApply::NotFound)
            }
        }
        SyncFrame::Channel { name, url } => {
            let record = ChannelRecord {
                name: name.clone(),
                url: url.clone(),
                added_at: Utc::now(),
            };
            if storage.add_channel(&record)? {
                Ok(SyncApply::ChannelAdded)
            } else {
                Ok(SyncApply::ChannelExists)
            }
        }
    }
}

/// Build the direct messages that push a frame to every configured peer,
/// skipping `origin` (the peer the frame came from, if any).
pub fn fan_out(frame: &SyncFrame, peers: &[String], origin: Option<&str>) -> Vec<OutgoingMessage> {
    let payload = frame.encode();
    let mut out = Vec::new();
    for peer in peers {
        if Some(peer.as_str()) == origin {
            continue;
        }
        debug!("queueing sync frame for peer {}", peer);
        let mut msg = OutgoingMessage::direct(peer, payload.clone());
        msg.priority = crate::interface::MessagePriority::Normal;
        out.push(msg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Storage) {
        let dir = TempDir::new().expect("tempdir");
        let storage = Storage::open(dir.path().to_str().unwrap()).expect("open storage");
        (dir, storage)
    }

    #[test]
    fn frame_round_trip() {
        let frame = SyncFrame::Mail {
            sender: "!a1b2c3d4".into(),
            author: "AA01".into(),
            recipient: "!0badcafe".into(),
            subject: "supplies".into(),
            content: "water at camp 2".into(),
            unique_id: "11111111-2222-3333-4444-555555555555".into(),
        };
        let encoded = frame.encode();
        assert!(is_sync_payload(&encoded));
        assert_eq!(SyncFrame::parse(&encoded), Some(frame));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert_eq!(SyncFrame::parse("BULLETIN|too|few"), None);
        assert_eq!(SyncFrame::parse("WARP|x"), None);
        assert_eq!(SyncFrame::parse(""), None);
        assert!(!is_sync_payload("hello there"));
    }

    #[test]
    fn multiline_content_is_flattened_on_encode() {
        let frame = SyncFrame::Bulletin {
            board: "General".into(),
            author: "AA01".into(),
            subject: "s".into(),
            content: "line one\nline two".into(),
            unique_id: "id-1".into(),
        };
        let encoded = frame.encode();
        assert!(!encoded.contains('\n'));
        assert!(SyncFrame::parse(&encoded).is_some());
    }

    #[test]
    fn apply_is_idempotent() {
        let (_dir, storage) = open_temp();
        let frame = SyncFrame::Bulletin {
            board: "Urgent".into(),
            author: "AA01".into(),
            subject: "evac".into(),
            content: "route closed".into(),
            unique_id: "id-urgent-1".into(),
        };
        match apply(&frame, &storage).unwrap() {
            SyncApply::NewBulletin(record) => assert_eq!(record.board, "Urgent"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(apply(&frame, &storage).unwrap(), SyncApply::Duplicate);
        assert_eq!(storage.bulletins_for_board("urgent").unwrap().len(), 1);
    }

    #[test]
    fn delete_frames_apply_through_index() {
        let (_dir, storage) = open_temp();
        let frame = SyncFrame::Mail {
            sender: "!a1b2c3d4".into(),
            author: "AA01".into(),
            recipient: "!0badcafe".into(),
            subject: "s".into(),
            content: "c".into(),
            unique_id: "id-mail-1".into(),
        };
        apply(&frame, &storage).unwrap();
        let del = SyncFrame::DeleteMail {
            unique_id: "id-mail-1".into(),
        };
        assert_eq!(apply(&del, &storage).unwrap(), SyncApply::Deleted);
        assert_eq!(apply(&del, &storage).unwrap(), SyncApply::NotFound);
    }

    #[test]
    fn fan_out_skips_the_origin_peer() {
        let frame = SyncFrame::Channel {
            name: "Emergency".into(),
            url: "https://example.com/e".into(),
        };
        let peers = vec!["!peer0001".to_string(), "!peer0002".to_string()];
        let msgs = fan_out(&frame, &peers, Some("!peer0001"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].to.as_deref(), Some("!peer0002"));
        assert_eq!(msgs[0].content, frame.encode());
    }
}
