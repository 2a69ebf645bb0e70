//! Outbound message scheduler.
//!
//! Sits between the command logic and the gateway writer. Everything bound
//! for the air is wrapped in an envelope with a category and priority and
//! queued here; the scheduler releases one message at a time, preferring
//! interactive replies over notifications and sync fan-out, while honoring
//! per-message earliest-send delays and a global minimum gap.
//!
//! The queue is a plain `Vec` with sort-on-tick. Queue depths on a mesh BBS
//! are tiny, so simplicity wins over a heap. Overflow drops the lowest
//! priority, oldest message; messages that wait too long get a single-step
//! priority escalation so fan-out cannot starve forever behind a chatty
//! user session.

use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use crate::interface::OutgoingMessage;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageCategory {
    /// Interactive reply to a user mid-session.
    Reply,
    /// Unsolicited notice to one node (new-mail ping, urgent copy).
    Notification,
    /// Public broadcast (urgent bulletin notice, JS8Call urgent relay).
    Broadcast,
    /// Store-and-forward frame to a peer station.
    SyncFanout,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
    Background,
}

#[derive(Debug)]
pub struct MessageEnvelope {
    pub category: MessageCategory,
    pub priority: Priority,
    pub earliest: Instant,
    pub enqueued_at: Instant,
    pub msg: OutgoingMessage,
}

impl MessageEnvelope {
    pub fn new(
        category: MessageCategory,
        priority: Priority,
        delay: Duration,
        msg: OutgoingMessage,
    ) -> Self {
        let now = Instant::now();
        Self {
            category,
            priority,
            earliest: now + delay,
            enqueued_at: now,
            msg,
        }
    }

    /// Envelope for an immediate interactive reply.
    pub fn reply(msg: OutgoingMessage) -> Self {
        Self::new(MessageCategory::Reply, Priority::High, Duration::ZERO, msg)
    }

    /// Envelope for a notification DM, slightly deferred so the session
    /// reply it usually follows goes out first.
    pub fn notification(msg: OutgoingMessage) -> Self {
        Self::new(
            MessageCategory::Notification,
            Priority::Normal,
            Duration::from_millis(500),
            msg,
        )
    }

    pub fn broadcast(msg: OutgoingMessage) -> Self {
        Self::new(
            MessageCategory::Broadcast,
            Priority::Normal,
            Duration::ZERO,
            msg,
        )
    }

    pub fn sync_fanout(msg: OutgoingMessage) -> Self {
        Self::new(MessageCategory::SyncFanout, Priority::Low, Duration::ZERO, msg)
    }
}

pub struct SchedulerConfig {
    pub min_send_gap_ms: u64,
    pub max_queue: usize,
    pub aging_threshold_ms: u64,
    pub stats_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_send_gap_ms: 2000,
            max_queue: 64,
            aging_threshold_ms: 15_000,
            stats_interval_ms: 60_000,
        }
    }
}

impl SchedulerConfig {
    fn aging_threshold(&self) -> Duration {
        Duration::from_millis(self.aging_threshold_ms)
    }
    fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

pub enum ScheduleCommand {
    Enqueue(MessageEnvelope),
    Snapshot(oneshot::Sender<SchedulerStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub queued: usize,
    pub dispatched_total: u64,
    pub dropped_total: u64,
    pub dropped_overflow: u64,
    pub escalations: u64,
}

#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<ScheduleCommand>,
}

impl SchedulerHandle {
    pub fn enqueue(&self, env: MessageEnvelope) {
        let _ = self.tx.send(ScheduleCommand::Enqueue(env));
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(ScheduleCommand::Shutdown(tx));
        let _ = rx.await;
    }

    pub async fn snapshot(&self) -> Option<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(ScheduleCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }
}

pub fn start_scheduler(
    cfg: SchedulerConfig,
    outgoing: mpsc::UnboundedSender<OutgoingMessage>,
) -> SchedulerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<ScheduleCommand>();
    let handle = SchedulerHandle { tx: tx.clone() };

    tokio::spawn(async move {
        let mut last_sent: Option<Instant> = None;
        let mut queue: Vec<MessageEnvelope> = Vec::new();
        let mut stats = SchedulerStats::default();
        const TICK: Duration = Duration::from_millis(50);
        let mut last_stats_log = Instant::now();
        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => {
                    match cmd {
                        ScheduleCommand::Enqueue(env) => {
                            if queue.len() >= cfg.max_queue {
                                // Victim: lowest priority, oldest.
                                if let Some(victim_pos) = queue.iter().enumerate().max_by(|a, b| {
                                    let (ai, av) = a;
                                    let (bi, bv) = b;
                                    av.priority.cmp(&bv.priority)
                                        .then(bv.enqueued_at.cmp(&av.enqueued_at))
                                        .then(ai.cmp(bi))
                                }).map(|(i, _)| i) {
                                    queue.remove(victim_pos);
                                    stats.dropped_total += 1;
                                    stats.dropped_overflow += 1;
                                    log::warn!("scheduler overflow: dropped one message (queued={})", queue.len());
                                }
                            }
                            queue.push(env);
                        },
                        ScheduleCommand::Snapshot(resp) => {
                            let _ = resp.send(SchedulerStats { queued: queue.len(), ..stats.clone() });
                        },
                        ScheduleCommand::Shutdown(done) => { let _ = done.send(()); break; }
                    }
                }
                _ = tokio::time::sleep(TICK) => {}
            }
            if queue.is_empty() {
                continue;
            }
            let now = Instant::now();

            if cfg.stats_interval_ms > 0
                && now.duration_since(last_stats_log) >= cfg.stats_interval()
            {
                log::debug!(
                    "scheduler stats: queued={} dispatched={} dropped={} overflow={} escalations={}",
                    queue.len(),
                    stats.dispatched_total,
                    stats.dropped_total,
                    stats.dropped_overflow,
                    stats.escalations
                );
                last_stats_log = now;
            }

            // Single-step escalation for messages that waited too long.
            for env in queue.iter_mut() {
                if env.priority != Priority::High
                    && now.duration_since(env.enqueued_at) >= cfg.aging_threshold()
                {
                    env.priority = match env.priority {
                        Priority::Background => Priority::Low,
                        Priority::Low => Priority::Normal,
                        Priority::Normal => Priority::High,
                        Priority::High => Priority::High,
                    };
                    stats.escalations += 1;
                    env.enqueued_at = now;
                }
            }

            queue.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.earliest.cmp(&b.earliest))
            });

            if let Some(pos) = queue.iter().position(|e| e.earliest <= now) {
                if let Some(last) = last_sent {
                    if now < last + Duration::from_millis(cfg.min_send_gap_ms) {
                        continue;
                    }
                }
                let ready = queue.remove(pos);
                if outgoing.send(ready.msg).is_err() {
                    log::warn!("outgoing channel closed; dropping message");
                    stats.dropped_total += 1;
                } else {
                    stats.dispatched_total += 1;
                    last_sent = Some(now);
                }
            }
        }
        log::debug!("scheduler loop terminated");
    });

    handle
}
