//! # BBS Core Module
//!
//! Core board functionality: the server event loop, per-node sessions, the
//! menu command processor, the outbound scheduler, and the fortune deck.
//!
//! ## Components
//!
//! - [`server`] - event loop tying gateway, storage, and sessions together
//! - [`session`] - per-node menu state
//! - [`commands`] - command parsing and menu flows
//! - [`dispatch`] - outbound message scheduling
//! - [`fortune`] - fortune cookie lines for the utilities menu
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshboard::bbs::BbsServer;
//! use meshboard::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut server = BbsServer::new(config).await?;
//!     server.run().await
//! }
//! ```

pub mod commands;
pub mod dispatch;
pub mod fortune;
pub mod server;
pub mod session;

pub use server::BbsServer;
