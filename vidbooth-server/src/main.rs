use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use vidbooth_core::{PngQrEncoder, SessionStore, VidboothConfig};
use vidbooth_server::bus::NotificationBus;
use vidbooth_server::{http, subsystems};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "vidbooth.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match VidboothConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let level = config
        .service
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    // Ensure the upload directory exists before anything streams into it
    let upload_dir = config.upload_dir();
    if let Err(e) = std::fs::create_dir_all(&upload_dir) {
        eprintln!(
            "Failed to create upload directory {}: {}",
            upload_dir.display(),
            e
        );
        std::process::exit(1);
    }

    if args.health {
        let probe = upload_dir.join(".healthcheck");
        match std::fs::write(&probe, b"ok") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                println!("✅ Upload directory writable: {}", upload_dir.display());
            }
            Err(e) => {
                println!("❌ Upload directory not writable: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Vidbooth health check passed");
        return Ok(());
    }

    let store = SessionStore::new();
    let bus = NotificationBus::new(config.bus.channel_capacity);

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn the retention reaper
    let reaper_store = store.clone();
    let reaper_config = config.retention.clone();
    let reaper_shutdown = tx.subscribe();
    tokio::spawn(async move {
        subsystems::reaper::run_reaper_loop(reaper_store, reaper_config, reaper_shutdown).await;
    });

    // HTTP + WebSocket server (foreground)
    let state = Arc::new(http::HttpState {
        store,
        bus,
        qr: Arc::new(PngQrEncoder::new()),
        config,
    });
    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
