//! Luminous Headless Server
//!
//! Serves the operator dashboard and its API. State changes are persisted to
//! Upstash Redis and the memory library is deduplicated in the background.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use luminous_lib::server::auth::generate_api_key;
use luminous_lib::server::{LuminousServer, ServerConfig};

#[derive(Parser)]
#[command(name = "luminous-server")]
#[command(about = "Luminous Dashboard Server")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "LUMINOUS_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// API key for authentication
    #[arg(short, long, env = "LUMINOUS_API_KEY")]
    api_key: Option<String>,

    /// Generate a new API key and exit
    #[arg(long)]
    generate_key: bool,

    /// Directory with the built dashboard
    #[arg(long)]
    public_dir: Option<PathBuf>,

    /// Minutes between autonomous memory dedup passes
    #[arg(long)]
    dedup_interval_mins: Option<u64>,

    /// Disable CORS
    #[arg(long)]
    no_cors: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; real deployments set the environment directly
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Generate API key if requested
    if args.generate_key {
        let key = generate_api_key();
        println!("Generated API key: {}", key);
        println!(
            "Set this as environment variable: export LUMINOUS_API_KEY={}",
            key
        );
        process::exit(0);
    }

    let verbose = args.verbose;
    let config = apply_args(ServerConfig::from_env(), args);

    // Initialize logging
    let mut filter = config.log_filter();
    if verbose {
        filter.push_str(",tower_http=debug");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    print_banner();

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        process::exit(1);
    }

    info!("Starting Luminous server with config: {:?}", config);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let server = LuminousServer::new(config);
    if let Err(e) = server.start(shutdown).await {
        error!("Server failed: {}", e);
        process::exit(1);
    }
    info!("Luminous server stopped");
}

/// CLI flags override environment values
fn apply_args(mut config: ServerConfig, args: Args) -> ServerConfig {
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key.filter(|k| !k.trim().is_empty());
    }
    if let Some(dir) = args.public_dir {
        config.public_dir = dir;
    }
    if let Some(mins) = args.dedup_interval_mins {
        config.set_dedup_interval_mins(mins);
    }
    if args.no_cors {
        config.enable_cors = false;
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }
    config
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}

fn print_banner() {
    println!(
        r#"
  _                     _
 | |   _   _ _ __ ___ (_)_ __   ___  _   _ ___
 | |  | | | | '_ ` _ \| | '_ \ / _ \| | | / __|
 | |__| |_| | | | | | | | | | | (_) | |_| \__ \
 |_____\__,_|_| |_| |_|_|_| |_|\___/ \__,_|___/
    "#
    );

    println!("  The Luminous Dashboard Server");
    println!("  Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}
