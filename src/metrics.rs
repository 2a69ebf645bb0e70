//! Minimal runtime counters for the BBS event loop.
use std::sync::atomic::{AtomicU64, Ordering};

static TEXT_RECEIVED: AtomicU64 = AtomicU64::new(0);
static REPLIES_SENT: AtomicU64 = AtomicU64::new(0);
static BROADCASTS_SENT: AtomicU64 = AtomicU64::new(0);
static SYNC_FRAMES_IN: AtomicU64 = AtomicU64::new(0);
static SYNC_FRAMES_OUT: AtomicU64 = AtomicU64::new(0);
static IGNORED_PACKETS: AtomicU64 = AtomicU64::new(0);

pub fn inc_text_received() {
    TEXT_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_replies_sent() {
    REPLIES_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_broadcasts_sent() {
    BROADCASTS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sync_frames_in() {
    SYNC_FRAMES_IN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sync_frames_out() {
    SYNC_FRAMES_OUT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_ignored_packets() {
    IGNORED_PACKETS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub text_received: u64,
    pub replies_sent: u64,
    pub broadcasts_sent: u64,
    pub sync_frames_in: u64,
    pub sync_frames_out: u64,
    pub ignored_packets: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        text_received: TEXT_RECEIVED.load(Ordering::Relaxed),
        replies_sent: REPLIES_SENT.load(Ordering::Relaxed),
        broadcasts_sent: BROADCASTS_SENT.load(Ordering::Relaxed),
        sync_frames_in: SYNC_FRAMES_IN.load(Ordering::Relaxed),
        sync_frames_out: SYNC_FRAMES_OUT.load(Ordering::Relaxed),
        ignored_packets: IGNORED_PACKETS.load(Ordering::Relaxed),
    }
}
