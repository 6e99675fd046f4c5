use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use chatmirror::store::MemoryStore;
use chatmirror::types::events::EventBus;
use chatmirror::{Mirror, MirrorConfig, Resolution};

// Loads a JSON snapshot of a message store into the in-memory backend and
// walks through what a host would do: list sessions, open one, resolve media.
//
// Usage:
//   cargo run -- --snapshot store.json
//   cargo run -- --snapshot store.json --session wxid_abc --config mirror.json

#[derive(Debug, Parser)]
#[command(name = "chatmirror", about = "Mirror a message store snapshot")]
struct Args {
    /// JSON snapshot of sessions, messages and media
    #[arg(short, long)]
    snapshot: PathBuf,

    /// JSON config file; defaults apply to missing keys
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session to open; defaults to the first one listed
    #[arg(long)]
    session: Option<String>,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => MirrorConfig::load(path)?,
        None => MirrorConfig::default(),
    }
    .with_env_overrides()?;

    let store = Arc::new(MemoryStore::from_snapshot(&args.snapshot).await?);
    info!("Snapshot loaded from {}", args.snapshot.display());

    let bus = Arc::new(EventBus::new());
    let mut mirror = Mirror::new(store.clone(), store.clone(), bus, &config);

    let update = mirror.refresh_sessions().await?;
    info!("{} sessions (sync version {})", update.total, update.sync_version);
    for session in mirror.sessions() {
        println!(
            "{:<24} {:>4} unread  {}",
            session.title(),
            session.unread_count,
            session.summary
        );
    }

    let session_id = match args
        .session
        .or_else(|| mirror.sessions().first().map(|s| s.id.clone()))
    {
        Some(id) => id,
        None => {
            warn!("Snapshot has no sessions");
            return Ok(());
        }
    };

    let messages = mirror.open_session(&session_id).await?;
    for message in messages.iter() {
        println!(
            "[{}] {}: {}",
            message.create_time, message.sender_id, message.content
        );
    }

    for (media, outcome) in mirror.resolve_loaded_media().await {
        match outcome {
            Resolution::Ready(path) => println!("{} #{} -> {}", media.class, media.local_id, path.display()),
            other => println!("{} #{} -> {:?}", media.class, media.local_id, other),
        }
    }

    mirror.shutdown().await?;
    Ok(())
}
