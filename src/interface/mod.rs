//! # Radio Gateway Interface Module
//!
//! Owns the link to the mesh radio gateway and turns it into two channels:
//! an inbound stream of [`PacketEvent`]s and an outbound sink of
//! [`OutgoingMessage`]s. Two transports are supported:
//!
//! - **TCP** (`tokio::net::TcpStream`) to a network-attached gateway
//! - **Serial** (`serialport`, behind the `serial` feature) to a USB/UART
//!   device, serviced by dedicated blocking threads
//!
//! Both carry the newline-delimited JSON envelopes defined in [`codec`].
//!
//! The writer task is the only place that touches the air: it chunks long
//! replies on UTF-8 boundaries and enforces a minimum gap between sends so
//! the BBS never saturates the shared channel.

pub mod codec;
pub mod nodes;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use crate::config::{InterfaceConfig, InterfaceType};
use crate::logutil::truncate_for_log;
use crate::metrics;
use codec::{chunk_utf8, decode_frame, encode_frame, Frame};

/// Priority level for outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePriority {
    /// Direct replies to a waiting user.
    High,
    /// Broadcast notices and sync fan-out.
    Normal,
}

/// Outgoing message handed to the writer task.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Destination node id; `None` broadcasts on `channel`.
    pub to: Option<String>,
    pub channel: u32,
    pub content: String,
    pub priority: MessagePriority,
}

impl OutgoingMessage {
    pub fn direct(to: &str, content: String) -> Self {
        Self {
            to: Some(to.to_string()),
            channel: 0,
            content,
            priority: MessagePriority::High,
        }
    }

    pub fn broadcast(content: String) -> Self {
        Self {
            to: None,
            channel: 0,
            content,
            priority: MessagePriority::Normal,
        }
    }
}

/// Inbound mesh activity, decoded from gateway frames.
#[derive(Debug, Clone)]
pub enum PacketEvent {
    MyInfo {
        id: String,
    },
    NodeInfo {
        id: String,
        short_name: String,
        long_name: String,
        hw_model: Option<String>,
        role: Option<String>,
    },
    Telemetry {
        id: String,
        battery_level: Option<u8>,
    },
    Text(TextEvent),
}

#[derive(Debug, Clone)]
pub struct TextEvent {
    pub from: String,
    pub to: Option<String>,
    pub channel: u32,
    pub payload: String,
}

fn frame_to_event(frame: Frame) -> Option<PacketEvent> {
    match frame {
        Frame::MyInfo { id } => Some(PacketEvent::MyInfo { id }),
        Frame::NodeInfo {
            id,
            short_name,
            long_name,
            hw_model,
            role,
        } => Some(PacketEvent::NodeInfo {
            id,
            short_name,
            long_name,
            hw_model,
            role,
        }),
        Frame::Telemetry { id, battery_level } => {
            Some(PacketEvent::Telemetry { id, battery_level })
        }
        Frame::Text {
            from,
            to,
            channel,
            payload,
        } => Some(PacketEvent::Text(TextEvent {
            from,
            to,
            channel,
            payload,
        })),
        Frame::Send { .. } => {
            warn!("gateway echoed a send frame; ignoring");
            None
        }
    }
}

/// Writer-side tuning derived from the interface config.
#[derive(Debug, Clone)]
pub struct LinkTuning {
    pub min_send_gap_ms: u64,
    pub max_frame_bytes: usize,
    pub mqtt_topic: Option<String>,
}

impl LinkTuning {
    pub fn from_config(cfg: &InterfaceConfig, max_frame_bytes: usize) -> Self {
        Self {
            // Hard floor keeps a misconfigured station from flooding the mesh.
            min_send_gap_ms: cfg.min_send_gap_ms.max(500),
            max_frame_bytes: max_frame_bytes.clamp(50, 230),
            mqtt_topic: if cfg.mqtt_topic.is_empty() {
                None
            } else {
                Some(cfg.mqtt_topic.clone())
            },
        }
    }
}

enum LinkWriter {
    Tcp(tokio::net::tcp::OwnedWriteHalf),
    #[cfg(feature = "serial")]
    Serial(std::sync::mpsc::Sender<String>),
}

impl LinkWriter {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            LinkWriter::Tcp(half) => {
                half.write_all(line.as_bytes()).await?;
                half.flush().await?;
                Ok(())
            }
            #[cfg(feature = "serial")]
            LinkWriter::Serial(tx) => tx
                .send(line.to_string())
                .map_err(|_| anyhow!("serial writer thread gone")),
        }
    }
}

/// Handle to a connected gateway link.
pub struct MeshInterface {
    outgoing_tx: mpsc::UnboundedSender<OutgoingMessage>,
}

impl MeshInterface {
    /// Connect to the gateway described by `cfg` and spawn the reader and
    /// writer tasks. Returns the interface handle plus the inbound event
    /// stream.
    pub async fn connect(
        cfg: &InterfaceConfig,
        max_frame_bytes: usize,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PacketEvent>)> {
        let tuning = LinkTuning::from_config(cfg, max_frame_bytes);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let writer = match cfg.interface_type {
            InterfaceType::Tcp => {
                let addr = format!("{}:{}", cfg.hostname, cfg.tcp_port);
                info!("connecting to gateway at {}", addr);
                let stream = tokio::net::TcpStream::connect(&addr)
                    .await
                    .map_err(|e| anyhow!("failed to connect to gateway {}: {}", addr, e))?;
                let (read_half, write_half) = stream.into_split();
                spawn_tcp_reader(read_half, event_tx);
                LinkWriter::Tcp(write_half)
            }
            InterfaceType::Serial => {
                #[cfg(feature = "serial")]
                {
                    let (reader_handle, writer_handle) =
                        open_serial(&cfg.port, cfg.baud_rate)?;
                    info!("opened serial gateway on {} @ {}", cfg.port, cfg.baud_rate);
                    spawn_serial_reader(reader_handle, event_tx);
                    LinkWriter::Serial(spawn_serial_writer(writer_handle))
                }
                #[cfg(not(feature = "serial"))]
                {
                    return Err(anyhow!(
                        "serial interface requested but the 'serial' feature is disabled"
                    ));
                }
            }
        };

        spawn_writer_task(writer, outgoing_rx, tuning);

        Ok((Self { outgoing_tx }, event_rx))
    }

    /// Sender half for outbound messages; cloneable for the scheduler.
    pub fn sender(&self) -> mpsc::UnboundedSender<OutgoingMessage> {
        self.outgoing_tx.clone()
    }
}

fn spawn_tcp_reader(
    read_half: tokio::net::tcp::OwnedReadHalf,
    event_tx: mpsc::UnboundedSender<PacketEvent>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_frame(&line) {
                        Ok(frame) => {
                            if let Some(event) = frame_to_event(frame) {
                                if event_tx.send(event).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("dropping bad frame: {} ({})", e, truncate_for_log(&line, 120));
                        }
                    }
                }
                Ok(None) => {
                    warn!("gateway closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("gateway read error: {}", e);
                    break;
                }
            }
        }
    });
}

/// The writer task: paces and chunks everything bound for the air.
fn spawn_writer_task(
    mut writer: LinkWriter,
    mut outgoing_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    tuning: LinkTuning,
) {
    tokio::spawn(async move {
        let gap = Duration::from_millis(tuning.min_send_gap_ms);
        let mut last_send: Option<Instant> = None;
        while let Some(msg) = outgoing_rx.recv().await {
            for chunk in chunk_utf8(&msg.content, tuning.max_frame_bytes) {
                if let Some(last) = last_send {
                    let elapsed = last.elapsed();
                    if elapsed < gap {
                        sleep(gap - elapsed).await;
                    }
                }
                let frame = Frame::Send {
                    to: msg.to.clone(),
                    channel: msg.channel,
                    payload: chunk.clone(),
                    // DMs are always sent reliable; broadcasts are not.
                    want_ack: msg.to.is_some(),
                    topic: tuning.mqtt_topic.clone(),
                };
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("failed to encode outbound frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = writer.write_line(&line).await {
                    warn!("gateway write error: {}", e);
                    return;
                }
                last_send = Some(Instant::now());
                match msg.to {
                    Some(ref dest) => {
                        debug!(
                            "sent {} bytes to {}: \"{}\"",
                            chunk.len(),
                            dest,
                            truncate_for_log(&chunk, 120)
                        );
                        metrics::inc_replies_sent();
                    }
                    None => {
                        debug!(
                            "broadcast {} bytes: \"{}\"",
                            chunk.len(),
                            truncate_for_log(&chunk, 120)
                        );
                        metrics::inc_broadcasts_sent();
                    }
                }
            }
        }
        debug!("writer task finished (channel closed)");
    });
}

#[cfg(feature = "serial")]
fn open_serial(
    port: &str,
    baud_rate: u32,
) -> Result<(Box<dyn serialport::SerialPort>, Box<dyn serialport::SerialPort>)> {
    let handle = serialport::new(port, baud_rate)
        .timeout(std::time::Duration::from_millis(250))
        .open()
        .map_err(|e| anyhow!("failed to open serial port {}: {}", port, e))?;
    let clone = handle
        .try_clone()
        .map_err(|e| anyhow!("failed to clone serial handle: {}", e))?;
    Ok((handle, clone))
}

#[cfg(feature = "serial")]
fn spawn_serial_reader(
    handle: Box<dyn serialport::SerialPort>,
    event_tx: mpsc::UnboundedSender<PacketEvent>,
) {
    std::thread::spawn(move || {
        use std::io::BufRead;
        let mut reader = std::io::BufReader::new(handle);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    warn!("serial gateway closed");
                    break;
                }
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_frame(&line) {
                        Ok(frame) => {
                            if let Some(event) = frame_to_event(frame) {
                                if event_tx.send(event).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("dropping bad frame: {} ({})", e, truncate_for_log(&line, 120));
                        }
                    }
                }
                // Serial reads time out constantly while the line is idle.
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("serial read error: {}", e);
                    break;
                }
            }
        }
    });
}

#[cfg(feature = "serial")]
fn spawn_serial_writer(
    mut handle: Box<dyn serialport::SerialPort>,
) -> std::sync::mpsc::Sender<String> {
    let (tx, rx) = std::sync::mpsc::channel::<String>();
    std::thread::spawn(move || {
        use std::io::Write;
        while let Ok(line) = rx.recv() {
            if let Err(e) = handle.write_all(line.as_bytes()).and_then(|_| handle.flush()) {
                warn!("serial write error: {}", e);
                break;
            }
        }
    });
    tx
}
