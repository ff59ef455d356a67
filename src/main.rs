//! classroom-live: live classroom collaboration server
//!
//! Hosts one in-memory session per live classroom and exposes it over
//! WebSocket at `/ws/{classroom_id}?user_id=...`. Classroom records and
//! memberships come from an external directory: either the REST backend
//! (`--directory-url`) or a JSON file (`--directory-file`).
//!
//! Usage:
//!   classroom-live --directory-url http://localhost:8000     # REST backend
//!   classroom-live --directory-file classrooms.json          # Static directory
//!   classroom-live --directory-file c.json --port 0 --verbose

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use live_server::{
    ClassroomDirectory, HttpDirectory, RegistryConfig, SessionRegistry, StaticDirectory,
};
use live_transport::{ADMIN_TOKEN_HEADER, TransportConfig, TransportServer};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "classroom-live", about = "Live classroom collaboration server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7171")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Base URL of the REST classroom directory
    #[arg(long, conflicts_with = "directory_file")]
    directory_url: Option<String>,

    /// JSON file with classrooms and memberships
    #[arg(long)]
    directory_file: Option<PathBuf>,

    /// Per-call timeout for directory requests
    #[arg(long, default_value = "5000")]
    directory_timeout_ms: u64,

    /// Maximum concurrent connections
    #[arg(long, default_value = "256")]
    max_connections: usize,

    /// Per-connection outbound queue length
    #[arg(long, default_value = "256")]
    outbound_buffer: usize,

    /// Server ping period (0 disables)
    #[arg(long, default_value = "30000")]
    heartbeat_interval_ms: u64,

    /// Close connections silent for this long (0 disables)
    #[arg(long, default_value = "75000")]
    idle_timeout_ms: u64,

    /// Token required by the classroom-deleted hook
    #[arg(long)]
    admin_token: Option<String>,

    /// Enable a permissive CORS layer
    #[arg(long)]
    cors: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let directory_timeout = Duration::from_millis(cli.directory_timeout_ms);

    match (cli.directory_url.clone(), cli.directory_file.clone()) {
        (Some(url), None) => match HttpDirectory::new(url, directory_timeout) {
            Ok(directory) => {
                let source = format!("REST backend at {}", directory.base_url());
                run(cli, directory, source).await
            }
            Err(e) => {
                error!("Failed to build directory client: {e}");
                std::process::exit(1);
            }
        },
        (None, Some(path)) => match StaticDirectory::from_file(&path) {
            Ok(directory) => {
                let source = format!("static file {}", path.display());
                run(cli, directory, source).await
            }
            Err(e) => {
                error!("Failed to load directory file {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        _ => {
            eprintln!("Exactly one of --directory-url or --directory-file is required");
            std::process::exit(2);
        }
    }
}

async fn run<D: ClassroomDirectory>(cli: Cli, directory: D, source: String) {
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(directory),
        RegistryConfig {
            directory_timeout: Duration::from_millis(cli.directory_timeout_ms),
            ..RegistryConfig::default()
        },
    ));

    println!();
    println!("  classroom-live v{}", env!("CARGO_PKG_VERSION"));
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Directory:  {source}");
    println!("  Heartbeat:  {} ms", cli.heartbeat_interval_ms);
    println!("  Idle limit: {} ms", cli.idle_timeout_ms);
    if cli.admin_token.is_some() {
        println!("  Hook auth:  {ADMIN_TOKEN_HEADER} required");
    }
    println!();

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        max_connections: Some(cli.max_connections),
        outbound_buffer: cli.outbound_buffer,
        heartbeat_interval_ms: cli.heartbeat_interval_ms,
        idle_timeout_ms: cli.idle_timeout_ms,
        admin_token: cli.admin_token.clone(),
        enable_cors: cli.cors,
    };

    let mut transport = match TransportServer::start(transport_config, registry.clone()).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    let base = format!("{}:{}", cli.hostname, transport.port());
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Server running!");
    println!();
    println!("  WebSocket endpoint:");
    println!("    ws://{base}/ws/{{classroom_id}}?user_id={{user_id}}");
    println!();
    println!("  Health check:");
    println!("    http://{base}/health");
    println!();
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    println!();
    println!("  Shutting down...");
    registry.shutdown_all().await;
    transport.stop().await;
    println!("  Server stopped.");
}
