//! # Meshboard - a store-and-forward BBS for mesh radio networks
//!
//! Meshboard runs a classic bulletin board over a long-range, low-bandwidth
//! mesh radio network. Remote nodes interact with it entirely through short
//! direct messages: single-letter menu navigation plus a handful of
//! stateless quick commands.
//!
//! ## Features
//!
//! - **Mail**: private node-to-node messages with read/reply/delete and a
//!   new-mail notification DM.
//! - **Bulletins**: four public boards (General, Info, News, Urgent) with
//!   an allow-list on Urgent and a mesh-wide broadcast for urgent posts.
//! - **Channel directory**: shared list of channel join URLs/PSKs.
//! - **Peer sync**: pipe-delimited store-and-forward frames exchanged with
//!   other boards, idempotent on unique ids.
//! - **Stats**: nodes-seen windows, hardware/role breakdowns, and a wall of
//!   shame for low batteries, all fed by passive mesh telemetry.
//! - **JS8Call bridge**: optional capture of HF traffic into browsable
//!   urgent/group/station buckets.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshboard::config::Config;
//! use meshboard::bbs::BbsServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut server = BbsServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bbs`] - server loop, sessions, menus, scheduler
//! - [`interface`] - radio gateway link and node registry
//! - [`storage`] - sled-backed message store and backups
//! - [`sync`] - peer BBS synchronization frames
//! - [`stats`] - node registry aggregation
//! - [`js8call`] - JS8Call HF bridge
//! - [`admin`] - sysop maintenance console
//! - [`config`] - configuration management and validation

pub mod admin;
pub mod bbs;
pub mod config;
pub mod interface;
pub mod js8call;
pub mod logutil;
pub mod metrics;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod validation;
