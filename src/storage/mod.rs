//! Persistent message store.
//!
//! All durable BBS state lives in a single embedded [`sled`] database under
//! the configured data directory, one tree per record family (`mail`,
//! `bulletins`, `channels`, `js8call`). Records are bincode-encoded.
//!
//! Primary keys embed the recipient/board plus a zero-padded millisecond
//! timestamp, so a prefix scan yields records in arrival order. Every mail
//! and bulletin also gets an `idx:{unique_id}` entry pointing at its primary
//! key; peer-sync deletes arrive carrying only the unique id and resolve
//! through that index. Insert-by-unique-id is idempotent, which is what
//! makes replayed sync frames harmless.

pub mod backup;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A private message addressed to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRecord {
    pub unique_id: String,
    pub sender: String,
    pub sender_short_name: String,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A public post on one of the boards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletinRecord {
    pub unique_id: String,
    pub board: String,
    pub sender_short_name: String,
    pub subject: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A channel directory entry (name plus join URL or PSK).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    pub url: String,
    pub added_at: DateTime<Utc>,
}

/// A message captured from the JS8Call client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Js8Record {
    pub sender: String,
    pub target: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Which JS8Call bucket a captured message lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Js8Bucket {
    Urgent,
    Groups,
    Messages,
}

impl Js8Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Js8Bucket::Urgent => "urgent",
            Js8Bucket::Groups => "groups",
            Js8Bucket::Messages => "messages",
        }
    }
}

pub struct Storage {
    db: sled::Db,
    mail: sled::Tree,
    bulletins: sled::Tree,
    channels: sled::Tree,
    js8call: sled::Tree,
}

const DB_NAME: &str = "meshboard.db";

fn ts_millis(ts: &DateTime<Utc>) -> u64 {
    ts.timestamp_millis().max(0) as u64
}

impl Storage {
    /// Open (or create) the database under `data_dir`.
    pub fn open(data_dir: &str) -> StorageResult<Self> {
        let path = Path::new(data_dir).join(DB_NAME);
        let db = sled::open(&path)?;
        let mail = db.open_tree("mail")?;
        let bulletins = db.open_tree("bulletins")?;
        let channels = db.open_tree("channels")?;
        let js8call = db.open_tree("js8call")?;
        debug!("opened message store at {}", path.display());
        Ok(Self {
            db,
            mail,
            bulletins,
            channels,
            js8call,
        })
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- mail ---

    /// Store a mail record. Returns `false` when a record with the same
    /// unique id already exists (replayed sync frame).
    pub fn add_mail(&self, record: &MailRecord) -> StorageResult<bool> {
        let idx_key = format!("idx:{}", record.unique_id);
        if self.mail.contains_key(idx_key.as_bytes())? {
            return Ok(false);
        }
        let key = format!(
            "mail:{}:{:020}:{}",
            record.recipient.to_lowercase(),
            ts_millis(&record.timestamp),
            record.unique_id
        );
        let bytes = bincode::serialize(record)?;
        self.mail.insert(key.as_bytes(), bytes)?;
        self.mail.insert(idx_key.as_bytes(), key.as_bytes())?;
        Ok(true)
    }

    /// All mail waiting for `recipient`, oldest first.
    pub fn mail_for(&self, recipient: &str) -> StorageResult<Vec<MailRecord>> {
        let prefix = format!("mail:{}:", recipient.to_lowercase());
        let mut out = Vec::new();
        for item in self.mail.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    pub fn mail_count_for(&self, recipient: &str) -> StorageResult<usize> {
        Ok(self.mail_for(recipient)?.len())
    }

    /// Delete a mail record by unique id via the index. Returns `false`
    /// when the id is unknown (already deleted, or never synced here).
    pub fn delete_mail(&self, unique_id: &str) -> StorageResult<bool> {
        let idx_key = format!("idx:{}", unique_id);
        match self.mail.remove(idx_key.as_bytes())? {
            Some(primary) => {
                self.mail.remove(&primary)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Every stored mail record, for the admin console.
    pub fn all_mail(&self) -> StorageResult<Vec<MailRecord>> {
        let mut out = Vec::new();
        for item in self.mail.scan_prefix(b"mail:") {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    // --- bulletins ---

    /// Store a bulletin. Idempotent on unique id, like [`Self::add_mail`].
    pub fn add_bulletin(&self, record: &BulletinRecord) -> StorageResult<bool> {
        let idx_key = format!("idx:{}", record.unique_id);
        if self.bulletins.contains_key(idx_key.as_bytes())? {
            return Ok(false);
        }
        let key = format!(
            "bulletin:{}:{:020}:{}",
            record.board.to_lowercase(),
            ts_millis(&record.timestamp),
            record.unique_id
        );
        let bytes = bincode::serialize(record)?;
        self.bulletins.insert(key.as_bytes(), bytes)?;
        self.bulletins.insert(idx_key.as_bytes(), key.as_bytes())?;
        Ok(true)
    }

    /// Bulletins on one board, oldest first. Board match is
    /// case-insensitive.
    pub fn bulletins_for_board(&self, board: &str) -> StorageResult<Vec<BulletinRecord>> {
        let prefix = format!("bulletin:{}:", board.to_lowercase());
        let mut out = Vec::new();
        for item in self.bulletins.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    pub fn delete_bulletin(&self, unique_id: &str) -> StorageResult<bool> {
        let idx_key = format!("idx:{}", unique_id);
        match self.bulletins.remove(idx_key.as_bytes())? {
            Some(primary) => {
                self.bulletins.remove(&primary)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn all_bulletins(&self) -> StorageResult<Vec<BulletinRecord>> {
        let mut out = Vec::new();
        for item in self.bulletins.scan_prefix(b"bulletin:") {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    // --- channel directory ---

    /// Add a channel entry. Returns `false` when a channel with the same
    /// name (case-insensitive) already exists.
    pub fn add_channel(&self, record: &ChannelRecord) -> StorageResult<bool> {
        let needle = record.name.to_lowercase();
        for existing in self.channels()? {
            if existing.name.to_lowercase() == needle {
                return Ok(false);
            }
        }
        let key = format!(
            "channel:{:020}:{}",
            ts_millis(&record.added_at),
            needle
        );
        let bytes = bincode::serialize(record)?;
        self.channels.insert(key.as_bytes(), bytes)?;
        Ok(true)
    }

    /// All directory entries, oldest first.
    pub fn channels(&self) -> StorageResult<Vec<ChannelRecord>> {
        let mut out = Vec::new();
        for item in self.channels.scan_prefix(b"channel:") {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    pub fn delete_channel(&self, name: &str) -> StorageResult<bool> {
        let needle = name.to_lowercase();
        let mut target = None;
        for item in self.channels.scan_prefix(b"channel:") {
            let (key, value) = item?;
            let record: ChannelRecord = bincode::deserialize(&value)?;
            if record.name.to_lowercase() == needle {
                target = Some(key);
                break;
            }
        }
        match target {
            Some(key) => {
                self.channels.remove(key)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // --- js8call ---

    pub fn add_js8(&self, bucket: Js8Bucket, record: &Js8Record) -> StorageResult<()> {
        // Same-millisecond traffic from one sender is valid; a random tail
        // keeps each record under its own key.
        let key = format!(
            "js8:{}:{:020}:{}:{}",
            bucket.as_str(),
            ts_millis(&record.received_at),
            record.sender,
            uuid::Uuid::new_v4().simple()
        );
        let bytes = bincode::serialize(record)?;
        self.js8call.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn js8_messages(&self, bucket: Js8Bucket) -> StorageResult<Vec<Js8Record>> {
        let prefix = format!("js8:{}:", bucket.as_str());
        let mut out = Vec::new();
        for item in self.js8call.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Distinct group targets seen in the group bucket, sorted.
    pub fn js8_groups(&self) -> StorageResult<Vec<String>> {
        let mut groups: Vec<String> = Vec::new();
        for record in self.js8_messages(Js8Bucket::Groups)? {
            if !groups.contains(&record.target) {
                groups.push(record.target);
            }
        }
        groups.sort();
        Ok(groups)
    }

    // --- summary counts for status/admin ---

    pub fn mail_total(&self) -> StorageResult<usize> {
        Ok(self.all_mail()?.len())
    }

    pub fn bulletin_total(&self) -> StorageResult<usize> {
        Ok(self.all_bulletins()?.len())
    }

    pub fn channel_total(&self) -> StorageResult<usize> {
        Ok(self.channels()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn open_temp() -> (TempDir, Storage) {
        let dir = TempDir::new().expect("tempdir");
        let storage = Storage::open(dir.path().to_str().unwrap()).expect("open storage");
        (dir, storage)
    }

    fn mail(recipient: &str, subject: &str) -> MailRecord {
        MailRecord {
            unique_id: Uuid::new_v4().to_string(),
            sender: "!a1b2c3d4".into(),
            sender_short_name: "AA01".into(),
            recipient: recipient.into(),
            subject: subject.into(),
            content: "body".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn mail_insert_fetch_delete() {
        let (_dir, storage) = open_temp();
        let record = mail("!0badcafe", "hello");
        assert!(storage.add_mail(&record).unwrap());
        let inbox = storage.mail_for("!0BADCAFE").unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].subject, "hello");
        assert!(storage.delete_mail(&record.unique_id).unwrap());
        assert!(storage.mail_for("!0badcafe").unwrap().is_empty());
        assert!(!storage.delete_mail(&record.unique_id).unwrap());
    }

    #[test]
    fn duplicate_unique_id_is_a_noop() {
        let (_dir, storage) = open_temp();
        let record = mail("!0badcafe", "first");
        assert!(storage.add_mail(&record).unwrap());
        let mut replay = record.clone();
        replay.subject = "replayed".into();
        assert!(!storage.add_mail(&replay).unwrap());
        let inbox = storage.mail_for("!0badcafe").unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].subject, "first");
    }

    #[test]
    fn bulletins_scoped_to_board() {
        let (_dir, storage) = open_temp();
        for (board, subject) in [("General", "a"), ("Urgent", "b"), ("general", "c")] {
            let record = BulletinRecord {
                unique_id: Uuid::new_v4().to_string(),
                board: board.into(),
                sender_short_name: "AA01".into(),
                subject: subject.into(),
                content: "text".into(),
                timestamp: Utc::now(),
            };
            assert!(storage.add_bulletin(&record).unwrap());
        }
        assert_eq!(storage.bulletins_for_board("GENERAL").unwrap().len(), 2);
        assert_eq!(storage.bulletins_for_board("Urgent").unwrap().len(), 1);
        assert_eq!(storage.bulletin_total().unwrap(), 3);
    }

    #[test]
    fn channel_names_are_unique_case_insensitive() {
        let (_dir, storage) = open_temp();
        let record = ChannelRecord {
            name: "Emergency".into(),
            url: "https://example.com/e".into(),
            added_at: Utc::now(),
        };
        assert!(storage.add_channel(&record).unwrap());
        let dup = ChannelRecord {
            name: "EMERGENCY".into(),
            url: "https://example.com/other".into(),
            added_at: Utc::now(),
        };
        assert!(!storage.add_channel(&dup).unwrap());
        assert!(storage.delete_channel("emergency").unwrap());
        assert!(storage.channels().unwrap().is_empty());
    }

    #[test]
    fn js8_groups_are_distinct_and_sorted() {
        let (_dir, storage) = open_temp();
        for target in ["@NET2", "@NET1", "@NET2"] {
            let record = Js8Record {
                sender: "K1ABC".into(),
                target: target.into(),
                body: "check in".into(),
                received_at: Utc::now(),
            };
            storage.add_js8(Js8Bucket::Groups, &record).unwrap();
        }
        assert_eq!(storage.js8_groups().unwrap(), vec!["@NET1", "@NET2"]);
        assert_eq!(storage.js8_messages(Js8Bucket::Groups).unwrap().len(), 3);
        assert!(storage.js8_messages(Js8Bucket::Urgent).unwrap().is_empty());
    }

    #[test]
    fn js8_same_sender_same_millisecond_keeps_both() {
        let (_dir, storage) = open_temp();
        let received_at = Utc::now();
        for body in ["first", "second"] {
            let record = Js8Record {
                sender: "K1ABC".into(),
                target: "@NET1".into(),
                body: body.into(),
                received_at,
            };
            storage.add_js8(Js8Bucket::Groups, &record).unwrap();
        }
        let messages = storage.js8_messages(Js8Bucket::Groups).unwrap();
        assert_eq!(messages.len(), 2);
    }
}
