//! LANBEAM CLI
//!
//! Peer-to-peer LAN file transfer: discover peers on the local broadcast
//! domain, send them files, folders, or text, and receive with atomic
//! writes and collision-free naming.

mod config;
mod host;
mod progress;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use config::{CliConfig, FileStore};
use console::style;
use host::SystemHostInfo;
use lanbeam_core::{
    Engine, EngineConfig, EngineEvent, Providers, SessionStatus, TransferItem,
};
use lanbeam_net::SystemEnumerator;
use progress::{SessionBar, format_bytes};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// LANBEAM - LAN file transfer with zero setup
#[derive(Parser)]
#[command(name = "lanbeam")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a receiving daemon, accepting transfers into the configured
    /// destination
    Daemon {
        /// Destination directory (overrides the configured default)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Decline all incoming transfers instead of accepting
        #[arg(long)]
        decline: bool,
    },

    /// Send files, folders, or text to a peer
    Send {
        /// Peer display name or IP address
        #[arg(short, long)]
        to: String,

        /// Files or folders to send
        paths: Vec<PathBuf>,

        /// Inline text to send instead of (or alongside) paths
        #[arg(long)]
        text: Option<String>,

        /// Seconds to wait for the peer to appear
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },

    /// List discovered peers
    Peers {
        /// Seconds to listen before printing
        #[arg(long, default_value_t = 3)]
        wait: u64,
    },

    /// Show or change configuration
    Config {
        /// Set the display name
        #[arg(long)]
        name: Option<String>,

        /// Set the default destination directory
        #[arg(long)]
        destination: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if cli.verbose { "debug" } else { "warn" }.into()
            }),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(CliConfig::default_path);
    let store = Arc::new(FileStore::open(config_path)?);

    let result = match cli.command {
        Commands::Daemon { output, decline } => run_daemon(store, output, decline).await,
        Commands::Send {
            to,
            paths,
            text,
            wait,
        } => run_send(store, to, paths, text, wait).await,
        Commands::Peers { wait } => run_peers(store, wait).await,
        Commands::Config { name, destination } => run_config(&store, name, destination),
    };

    if let Err(e) = result {
        eprintln!("{} {e:#}", style("error:").red().bold());
        std::process::exit(1);
    }
    Ok(())
}

async fn start_engine(store: &Arc<FileStore>) -> anyhow::Result<Engine> {
    let settings = lanbeam_core::providers::SettingsStore::load(store.as_ref());
    let engine_config = EngineConfig::with_port(settings.port);

    Engine::start(
        engine_config,
        Providers {
            settings: Arc::clone(store) as Arc<dyn lanbeam_core::providers::SettingsStore>,
            save_memory: Arc::clone(store) as Arc<dyn lanbeam_core::providers::SaveLocationMemory>,
            host: Arc::new(SystemHostInfo::detect()),
            interfaces: Arc::new(SystemEnumerator),
        },
    )
    .await
    .context("starting engine")
}

async fn run_daemon(
    store: Arc<FileStore>,
    output: Option<PathBuf>,
    decline: bool,
) -> anyhow::Result<()> {
    let engine = start_engine(&store).await?;
    let mut events = engine.subscribe();

    println!(
        "{} listening on port {} as {}",
        style("lanbeam").green().bold(),
        engine.config().port,
        lanbeam_core::providers::SettingsStore::load(store.as_ref()).display_name,
    );

    let mut bars: HashMap<uuid::Uuid, SessionBar> = HashMap::new();

    loop {
        match events.recv().await {
            EngineEvent::PeerFound(peer) => {
                println!(
                    "{} {} ({}) on {}",
                    style("+").green(),
                    peer.name,
                    peer.platform,
                    peer.endpoint()
                );
            }
            EngineEvent::PeerLost(peer) => {
                println!("{} {}", style("-").red(), peer.name);
            }
            EngineEvent::TransferRequest(request) => {
                println!(
                    "{} {} offers {} item(s), {}{}",
                    style("?").yellow().bold(),
                    request.peer_name,
                    request.item_count,
                    format_bytes(request.total_bytes),
                    if request.truncated { " (preview truncated)" } else { "" },
                );
                for (name, size, kind) in &request.preview {
                    let size_text = if *size < 0 {
                        "dir".to_string()
                    } else {
                        format_bytes(*size as u64)
                    };
                    println!("    {kind:6} {name} ({size_text})");
                }

                if decline {
                    engine
                        .decline_request(&request, "transfers disabled on this host")
                        .await;
                    println!("  declined");
                } else {
                    match engine.accept_request(&request, output.clone(), false).await {
                        Ok(id) => println!("  accepted as session {id}"),
                        Err(e) => {
                            println!("  cannot accept: {e}");
                            engine.decline_request(&request, &e.to_string()).await;
                        }
                    }
                }
            }
            EngineEvent::SessionStarted(session) => {
                bars.insert(session.id, SessionBar::new(&session));
            }
            EngineEvent::SessionProgress(session) => {
                if let Some(bar) = bars.get(&session.id) {
                    bar.update(&session);
                }
            }
            EngineEvent::SessionCompleted(session) => {
                if let Some(bar) = bars.remove(&session.id) {
                    bar.finish("done");
                }
                println!(
                    "{} received {} file(s), {}",
                    style("✓").green().bold(),
                    session.files_completed(),
                    format_bytes(session.bytes_transferred()),
                );
            }
            EngineEvent::SessionFailed { session, error } => {
                if let Some(bar) = bars.remove(&session.id) {
                    bar.finish("failed");
                }
                let label = match session.status() {
                    SessionStatus::Cancelled => style("cancelled").yellow(),
                    _ => style("failed").red(),
                };
                println!("{label}: {error}");
            }
        }
    }
}

async fn run_send(
    store: Arc<FileStore>,
    to: String,
    paths: Vec<PathBuf>,
    text: Option<String>,
    wait: u64,
) -> anyhow::Result<()> {
    if paths.is_empty() && text.is_none() {
        bail!("nothing to send: pass paths or --text");
    }

    let mut items = Vec::new();
    for path in &paths {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("unusable file name: {}", path.display()))?
            .to_string();
        let absolute = path
            .canonicalize()
            .with_context(|| format!("resolving {}", path.display()))?;
        if meta.is_dir() {
            items.push(TransferItem::folder(name, absolute));
        } else {
            items.push(TransferItem::file(name, absolute, meta.len()));
        }
    }
    if let Some(text) = text {
        items.push(TransferItem::text("text snippet", text));
    }

    let engine = start_engine(&store).await?;
    let mut events = engine.subscribe();

    // Give discovery a beat, then look for the peer, refreshing while the
    // wait budget lasts.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait);
    let peer = loop {
        engine.refresh_neighbours().await;
        let found = engine.peers().into_iter().find(|peer| {
            peer.name.eq_ignore_ascii_case(&to) || peer.key.ip.to_string() == to
        });
        if let Some(peer) = found {
            break peer;
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("peer '{to}' not found on the local network");
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    };

    println!(
        "sending {} item(s) to {} ({})",
        items.len(),
        peer.name,
        peer.endpoint()
    );

    let session_id = engine.send_items(peer, items).await?;
    let mut bar: Option<SessionBar> = None;

    loop {
        match events.recv().await {
            EngineEvent::SessionStarted(session) if session.id == session_id => {
                println!("{}", style("accepted, streaming…").green());
                bar = Some(SessionBar::new(&session));
            }
            EngineEvent::SessionProgress(session) if session.id == session_id => {
                if let Some(bar) = &bar {
                    bar.update(&session);
                }
            }
            EngineEvent::SessionCompleted(session) if session.id == session_id => {
                if let Some(bar) = &bar {
                    bar.finish("done");
                }
                println!(
                    "{} sent {} file(s), {}",
                    style("✓").green().bold(),
                    session.files_completed(),
                    format_bytes(session.bytes_transferred()),
                );
                let failed = session.failed_items();
                if failed > 0 {
                    println!("{} {failed} item(s) failed", style("!").yellow());
                }
                engine.shutdown().await;
                return Ok(());
            }
            EngineEvent::SessionFailed { session, error } if session.id == session_id => {
                if let Some(bar) = &bar {
                    bar.finish("failed");
                }
                engine.shutdown().await;
                bail!("transfer {}: {error}", match session.status() {
                    SessionStatus::Cancelled => "cancelled",
                    _ => "failed",
                });
            }
            _ => {}
        }
    }
}

async fn run_peers(store: Arc<FileStore>, wait: u64) -> anyhow::Result<()> {
    let engine = start_engine(&store).await?;

    tokio::time::sleep(Duration::from_secs(wait)).await;
    engine.refresh_neighbours().await;

    let peers = engine.peers();
    if peers.is_empty() {
        println!("no peers found");
    } else {
        println!(
            "{:<20} {:<22} {:<10} {}",
            "NAME", "ENDPOINT", "LINK", "SYSTEM"
        );
        for peer in peers {
            println!(
                "{:<20} {:<22} {:<10} {}",
                peer.name,
                peer.endpoint().to_string(),
                peer.connection_type.to_string(),
                peer.system,
            );
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn run_config(
    store: &Arc<FileStore>,
    name: Option<String>,
    destination: Option<PathBuf>,
) -> anyhow::Result<()> {
    if name.is_none() && destination.is_none() {
        let config = store.config();
        println!("display_name  = {}", config.settings.display_name);
        println!("destination   = {}", config.settings.destination.display());
        println!("port          = {}", config.settings.port);
        println!("notifications = {}", config.settings.show_notifications);
        println!("autostart     = {}", config.settings.autostart);
        println!("remembered    = {} peer(s)", config.remembered_locations.len());
        return Ok(());
    }

    store.update(|config| {
        if let Some(name) = name {
            config.settings.display_name = name;
        }
        if let Some(destination) = destination {
            config.settings.destination = destination;
        }
    });
    println!("saved");
    Ok(())
}
