//! Binary entrypoint for the meshboard CLI.
//!
//! Commands:
//! - `start` - run the BBS server (interface overrides via flags)
//! - `init` - create a starter `config.toml`
//! - `status` - print store and configuration summary
//! - `admin` - interactive maintenance console over the local store
//! - `backup create|list|verify|restore` - snapshot management
//!
//! See the library crate docs for module-level details: `meshboard::`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use meshboard::bbs::BbsServer;
use meshboard::config::{CliOverrides, Config};
use meshboard::storage::backup::BackupManager;
use meshboard::storage::Storage;

#[derive(Parser)]
#[command(name = "meshboard")]
#[command(about = "A store-and-forward BBS for mesh radio networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the BBS server
    Start {
        /// Gateway interface type (serial or tcp)
        #[arg(short = 'i', long)]
        interface_type: Option<String>,
        /// Serial device path (e.g. /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,
        /// Gateway hostname for TCP links
        #[arg(long)]
        host: Option<String>,
        /// MQTT topic label for bridged gateways
        #[arg(short = 't', long)]
        mqtt_topic: Option<String>,
    },
    /// Create a starter configuration file
    Init,
    /// Show store and configuration summary
    Status,
    /// Open the interactive maintenance console
    Admin,
    /// Manage data directory snapshots
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Create a new snapshot
    Create {
        /// Directory to write snapshots into
        #[arg(long, default_value = "./backups")]
        dir: String,
    },
    /// List existing snapshots
    List {
        #[arg(long, default_value = "./backups")]
        dir: String,
    },
    /// Verify a snapshot's checksum
    Verify {
        /// Snapshot id (from `backup list`)
        id: String,
        #[arg(long, default_value = "./backups")]
        dir: String,
    },
    /// Restore a snapshot; its contents land under `<into>/data`
    Restore {
        id: String,
        #[arg(long, default_value = "./backups")]
        dir: String,
        /// Directory to unpack the snapshot into
        #[arg(long, default_value = "./restored")]
        into: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start {
            interface_type,
            port,
            host,
            mqtt_topic,
        } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            config.merge_cli(&CliOverrides {
                interface_type,
                port,
                host,
                mqtt_topic,
            })?;
            info!("Starting meshboard v{}", env!("CARGO_PKG_VERSION"));
            let mut server = BbsServer::new(config).await?;
            server.run().await?;
        }
        Commands::Init => {
            if tokio::fs::metadata(&cli.config).await.is_ok() {
                anyhow::bail!("{} already exists; refusing to overwrite", cli.config);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!(
                "Wrote {}. Edit the [interface] section for your gateway, then run 'meshboard start'.",
                cli.config
            );
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let server = BbsServer::new(config).await?;
            server.show_status().await?;
        }
        Commands::Admin => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let storage = Storage::open(&config.storage.data_dir)?;
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            meshboard::admin::run_console(&storage, stdin.lock(), &mut stdout)?;
        }
        Commands::Backup { action } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            run_backup(&config, action)?;
        }
    }

    Ok(())
}

fn run_backup(config: &Config, action: BackupAction) -> Result<()> {
    let data_dir = std::path::PathBuf::from(&config.storage.data_dir);
    match action {
        BackupAction::Create { dir } => {
            let mut manager = BackupManager::new(data_dir, dir.into())?;
            let meta = manager.create_snapshot()?;
            println!(
                "Created snapshot {} ({} bytes, sha256 {})",
                meta.id, meta.size_bytes, meta.checksum
            );
        }
        BackupAction::List { dir } => {
            let manager = BackupManager::new(data_dir, dir.into())?;
            let snapshots = manager.list_snapshots();
            if snapshots.is_empty() {
                println!("No snapshots found.");
            }
            for meta in snapshots {
                println!(
                    "{}  {}  {} bytes",
                    meta.id,
                    meta.created_at.format("%Y-%m-%d %H:%M:%S"),
                    meta.size_bytes
                );
            }
        }
        BackupAction::Verify { id, dir } => {
            let manager = BackupManager::new(data_dir, dir.into())?;
            if manager.verify_snapshot(&id)? {
                println!("Snapshot {} verified OK.", id);
            } else {
                println!("Snapshot {} FAILED verification.", id);
                std::process::exit(1);
            }
        }
        BackupAction::Restore { id, dir, into } => {
            let manager = BackupManager::new(data_dir, dir.into())?;
            let target = std::path::PathBuf::from(&into);
            manager.restore_snapshot(&id, &target)?;
            println!("Restored snapshot {} under {}/data.", id, into);
        }
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(cfg) = config {
        if let Some(level) = parse_level(&cfg.logging.level) {
            if verbosity == 0 {
                builder.filter_level(level);
            }
        }
        if let Some(ref file) = cfg.logging.file {
            if let Ok(f) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
            {
                let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
                let write_mutex = mutex.clone();
                let is_tty = atty::is(atty::Stream::Stdout);
                builder.format(move |fmt, record| {
                    let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                    let line = format!("{} [{}] {}", ts, record.level(), record.args());
                    if let Ok(mut guard) = write_mutex.lock() {
                        let _ = writeln!(guard, "{}", line);
                    }
                    if is_tty {
                        writeln!(fmt, "{}", line)
                    } else {
                        Ok(())
                    }
                });
                let _ = builder.try_init();
                return;
            }
        }
    }
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}

fn parse_level(level: &str) -> Option<log::LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some(log::LevelFilter::Trace),
        "debug" => Some(log::LevelFilter::Debug),
        "info" => Some(log::LevelFilter::Info),
        "warn" => Some(log::LevelFilter::Warn),
        "error" => Some(log::LevelFilter::Error),
        _ => None,
    }
}
