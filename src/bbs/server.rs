//! BBS server: the event loop that ties everything together.
//!
//! [`BbsServer`] owns the message store, the node registry, and the command
//! processor, and is the single consumer of gateway events. Inbound text is
//! routed three ways:
//!
//! 1. From a configured peer station: sync frames are applied to the local
//!    store; anything else from a peer is ignored.
//! 2. Direct message to our node: handed to the command processor, whose
//!    actions are wrapped in envelopes and queued on the scheduler.
//! 3. Everything else (channel chatter, DMs between other nodes relayed to
//!    us): counted and dropped. The board never answers on a shared channel
//!    uninvited.

use anyhow::Result;
use log::{debug, info, warn};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::bbs::commands::{Action, CommandProcessor};
use crate::bbs::dispatch::{start_scheduler, MessageEnvelope, SchedulerConfig, SchedulerHandle};
use crate::bbs::fortune::FortuneDeck;
use crate::config::Config;
use crate::interface::nodes::NodeRegistry;
use crate::interface::{MeshInterface, OutgoingMessage, PacketEvent, TextEvent};
use crate::js8call::{self, Js8Event};
use crate::logutil::{escape_log, truncate_for_log};
use crate::metrics;
use crate::storage::{Js8Record, Storage};
use crate::sync::{self, SyncApply};

pub struct BbsServer {
    config: Config,
    storage: Storage,
    nodes: NodeRegistry,
    processor: CommandProcessor,
    my_node_id: Option<String>,
    scheduler: Option<SchedulerHandle>,
}

impl BbsServer {
    pub async fn new(config: Config) -> Result<Self> {
        let data_dir = config.storage.data_dir.clone();
        tokio::fs::create_dir_all(&data_dir).await?;

        let storage = Storage::open(&data_dir)?;
        let nodes = NodeRegistry::load(&data_dir)?;
        let fortunes = FortuneDeck::load(&Path::new(&data_dir).join("fortunes.txt"));
        let processor = CommandProcessor::new(&config, fortunes);

        Ok(Self {
            config,
            storage,
            nodes,
            processor,
            my_node_id: None,
            scheduler: None,
        })
    }

    /// Connect to the gateway and process events until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "BBS '{}' starting ({} interface)",
            self.config.bbs.name, self.config.interface.interface_type
        );

        let (interface, mut event_rx) = loop {
            match MeshInterface::connect(
                &self.config.interface,
                self.config.storage.max_message_size,
            )
            .await
            {
                Ok(pair) => break pair,
                Err(e) if self.config.interface.require_device_at_startup => {
                    return Err(e);
                }
                Err(e) => {
                    warn!("gateway unreachable: {}; retrying in 30s", e);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        };

        let scheduler = start_scheduler(
            SchedulerConfig {
                min_send_gap_ms: self.config.interface.min_send_gap_ms.max(500),
                ..SchedulerConfig::default()
            },
            interface.sender(),
        );
        self.scheduler = Some(scheduler);

        let (js8_tx, mut js8_rx) = mpsc::unbounded_channel::<Js8Event>();
        if let Some(js8_cfg) = self.config.js8call.clone() {
            info!(
                "starting JS8Call bridge to {}:{}",
                js8_cfg.host, js8_cfg.port
            );
            tokio::spawn(js8call::run_bridge(js8_cfg, js8_tx));
        } else {
            drop(js8_tx);
        }

        let mut housekeeping = tokio::time::interval(Duration::from_secs(60));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            warn!("gateway event stream ended");
                            break;
                        }
                    }
                }
                Some(event) = js8_rx.recv() => {
                    self.handle_js8_event(event);
                }
                _ = housekeeping.tick() => {
                    self.nodes.save_quietly();
                    if let Err(e) = self.storage.flush() {
                        warn!("storage flush failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        self.nodes.save()?;
        self.storage.flush()?;
        let snap = metrics::snapshot();
        info!(
            "shutdown complete: {} texts in, {} replies out, {} broadcasts, {} sync in/{} out, {} ignored",
            snap.text_received,
            snap.replies_sent,
            snap.broadcasts_sent,
            snap.sync_frames_in,
            snap.sync_frames_out,
            snap.ignored_packets
        );
        Ok(())
    }

    fn handle_event(&mut self, event: PacketEvent) {
        match event {
            PacketEvent::MyInfo { id } => {
                info!("gateway reports our node id is {}", id);
                self.my_node_id = Some(id);
            }
            PacketEvent::NodeInfo {
                id,
                short_name,
                long_name,
                hw_model,
                role,
            } => {
                debug!("nodeinfo for {} ({})", id, escape_log(&short_name));
                self.nodes
                    .observe_nodeinfo(&id, &short_name, &long_name, hw_model, role);
            }
            PacketEvent::Telemetry { id, battery_level } => {
                self.nodes.observe_telemetry(&id, battery_level);
            }
            PacketEvent::Text(event) => {
                metrics::inc_text_received();
                self.nodes.touch(&event.from);
                self.route_text(event);
            }
        }
    }

    fn route_text(&mut self, event: TextEvent) {
        if self.is_sync_peer(&event.from) {
            self.handle_peer_text(event);
            return;
        }

        let is_dm_to_us = match (&event.to, &self.my_node_id) {
            (Some(to), Some(me)) => to == me,
            // Until the gateway tells us who we are, treat any DM as ours.
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !is_dm_to_us {
            metrics::inc_ignored_packets();
            return;
        }

        let actions =
            self.processor
                .handle_message(&event.from, &event.payload, &self.storage, &self.nodes);
        self.dispatch_actions(&event.from, actions);
    }

    fn is_sync_peer(&self, node_id: &str) -> bool {
        self.config.sync.bbs_nodes.iter().any(|n| n == node_id)
    }

    /// Text from a configured peer station. Only sync frames are honored;
    /// peers do not get menu sessions.
    fn handle_peer_text(&mut self, event: TextEvent) {
        let payload = event.payload.trim();
        if !sync::is_sync_payload(payload) {
            debug!(
                "ignoring non-sync message from peer {}: \"{}\"",
                event.from,
                truncate_for_log(payload, 80)
            );
            metrics::inc_ignored_packets();
            return;
        }
        metrics::inc_sync_frames_in();
        let Some(frame) = sync::SyncFrame::parse(payload) else {
            warn!(
                "malformed sync frame from {}: \"{}\"",
                event.from,
                truncate_for_log(payload, 80)
            );
            return;
        };
        match sync::apply(&frame, &self.storage) {
            Ok(SyncApply::NewMail(record)) => {
                info!(
                    "sync: new mail for {} from peer {}",
                    record.recipient, event.from
                );
                self.enqueue(MessageEnvelope::notification(OutgoingMessage::direct(
                    &record.recipient,
                    format!(
                        "You have a new mail message from {}. Check your mailbox by responding to this message with CM.",
                        record.sender_short_name
                    ),
                )));
            }
            Ok(SyncApply::NewBulletin(record)) => {
                info!(
                    "sync: new bulletin on {} from peer {}",
                    record.board, event.from
                );
                if record.board.eq_ignore_ascii_case("urgent") {
                    self.enqueue(MessageEnvelope::broadcast(OutgoingMessage::broadcast(
                        format!(
                            "NEW URGENT BULLETIN\nFrom: {}\nTitle: {}",
                            record.sender_short_name, record.subject
                        ),
                    )));
                }
            }
            Ok(SyncApply::Duplicate) => {
                debug!("sync: duplicate frame from {}, already applied", event.from);
            }
            Ok(SyncApply::Deleted) | Ok(SyncApply::ChannelAdded) => {}
            Ok(SyncApply::NotFound) => {
                debug!("sync: delete for unknown id from {}", event.from);
            }
            Ok(SyncApply::ChannelExists) => {
                debug!("sync: channel already in directory");
            }
            Err(e) => {
                warn!("failed to apply sync frame from {}: {}", event.from, e);
            }
        }
    }

    /// Turn command processor actions into scheduler envelopes.
    fn dispatch_actions(&mut self, from: &str, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Reply(text) => {
                    self.enqueue(MessageEnvelope::reply(OutgoingMessage::direct(from, text)));
                }
                Action::Notify { to, text } => {
                    self.enqueue(MessageEnvelope::notification(OutgoingMessage::direct(
                        &to, text,
                    )));
                }
                Action::Broadcast(text) => {
                    self.enqueue(MessageEnvelope::broadcast(OutgoingMessage::broadcast(text)));
                }
                Action::Sync(frame) => {
                    for msg in sync::fan_out(&frame, &self.config.sync.bbs_nodes, None) {
                        metrics::inc_sync_frames_out();
                        self.enqueue(MessageEnvelope::sync_fanout(msg));
                    }
                }
            }
        }
    }

    fn handle_js8_event(&mut self, event: Js8Event) {
        let Some(ref cfg) = self.config.js8call else {
            return;
        };
        let Some(bucket) = js8call::classify(cfg, &event.target) else {
            debug!(
                "dropping JS8Call message from {} to {}",
                event.sender, event.target
            );
            return;
        };
        let record = Js8Record {
            sender: event.sender.clone(),
            target: event.target.clone(),
            body: event.body.clone(),
            received_at: chrono::Utc::now(),
        };
        if let Err(e) = self.storage.add_js8(bucket, &record) {
            warn!("failed to store JS8Call message: {}", e);
            return;
        }
        if bucket == crate::storage::Js8Bucket::Urgent {
            self.enqueue(MessageEnvelope::broadcast(OutgoingMessage::broadcast(
                format!(
                    "URGENT JS8Call message from {}: {}",
                    event.sender, event.body
                ),
            )));
        }
    }

    fn enqueue(&self, env: MessageEnvelope) {
        if let Some(ref scheduler) = self.scheduler {
            scheduler.enqueue(env);
        } else {
            warn!("no scheduler running; dropping outbound message");
        }
    }

    /// Print a short status summary (the `status` CLI command).
    pub async fn show_status(&self) -> Result<()> {
        println!("BBS: {}", self.config.bbs.name);
        if !self.config.bbs.location.is_empty() {
            println!("Location: {}", self.config.bbs.location);
        }
        println!("Interface: {}", self.config.interface.interface_type);
        println!("Data directory: {}", self.config.storage.data_dir);
        println!("Mail messages: {}", self.storage.mail_total()?);
        println!("Bulletins: {}", self.storage.bulletin_total()?);
        println!("Channels: {}", self.storage.channel_total()?);
        println!("Known nodes: {}", self.nodes.len());
        println!("Sync peers: {}", self.config.sync.bbs_nodes.len());
        println!(
            "JS8Call bridge: {}",
            if self.config.js8call.is_some() {
                "configured"
            } else {
                "disabled"
            }
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn test_route_text(&mut self, event: TextEvent) {
        self.route_text(event);
    }

    #[cfg(test)]
    pub(crate) fn test_storage(&self) -> &Storage {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncFrame;
    use tempfile::TempDir;

    async fn server_with_peer(peer: &str) -> (TempDir, BbsServer) {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_str().unwrap().to_string();
        config.sync.bbs_nodes = vec![peer.to_string()];
        let server = BbsServer::new(config).await.expect("server");
        (dir, server)
    }

    #[tokio::test]
    async fn peer_sync_frame_is_applied_once() {
        let (_dir, mut server) = server_with_peer("!peer0001").await;
        let frame = SyncFrame::Bulletin {
            board: "General".into(),
            author: "AA01".into(),
            subject: "hello".into(),
            content: "from afar".into(),
            unique_id: "sync-b-1".into(),
        };
        let event = TextEvent {
            from: "!peer0001".into(),
            to: Some("!me000001".into()),
            channel: 0,
            payload: frame.encode(),
        };
        server.test_route_text(event.clone());
        server.test_route_text(event);
        let listing = server
            .test_storage()
            .bulletins_for_board("General")
            .unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].subject, "hello");
    }

    #[tokio::test]
    async fn non_sync_text_from_peer_is_ignored() {
        let (_dir, mut server) = server_with_peer("!peer0001").await;
        let before = metrics::snapshot().ignored_packets;
        server.test_route_text(TextEvent {
            from: "!peer0001".into(),
            to: Some("!me000001".into()),
            channel: 0,
            payload: "hello there".into(),
        });
        assert!(metrics::snapshot().ignored_packets > before);
        // No session was opened for the peer.
        assert_eq!(server.processor.active_sessions(), 0);
    }

    #[tokio::test]
    async fn broadcast_text_is_not_answered() {
        let (_dir, mut server) = server_with_peer("!peer0001").await;
        server.my_node_id = Some("!me000001".into());
        server.test_route_text(TextEvent {
            from: "!rando001".into(),
            to: None,
            channel: 2,
            payload: "x".into(),
        });
        assert_eq!(server.processor.active_sessions(), 0);
    }
}
