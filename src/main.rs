//! BitPost Realtime Relay Server
//!
//! Multiplexes presence, chat rooms, voice rooms, direct messages and
//! WebRTC call signaling over one binary-framed TCP connection per client.
//!
//! Usage:
//!   cargo run -- server                    # Run with defaults
//!   cargo run -- server --port 3009       # Run on a specific port

use std::env;
use std::sync::Arc;
use std::time::Duration;

use bitpost_realtime::storage::{MemoryProfiles, MemoryStore};
use bitpost_realtime::{Hub, RelayConfig, RelayServer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(&args).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("BitPost Realtime - Binary-Framed Community Relay Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the relay server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 3009)");
    println!("    --max-conn <NUM>    Maximum connections (default: 10000)");
    println!();
    println!("PROTOCOL:");
    println!("    One persistent TCP connection per client carrying framed messages:");
    println!("    - Presence: online user list pushed on every join/leave");
    println!("    - Chat rooms: per-community fan-out with bounded history");
    println!("    - Voice rooms: membership rosters pushed on change");
    println!("    - Direct messages: persisted, then relayed if the peer is online");
    println!("    - Call signaling: offer/answer/ICE relayed between peers");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 4000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    3009 // default port
}

fn parse_max_connections(args: &[String]) -> usize {
    for i in 0..args.len() {
        if args[i] == "--max-conn" && i + 1 < args.len() {
            if let Ok(max) = args[i + 1].parse() {
                return max;
            }
        }
    }
    10000 // default
}

async fn run_server(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig {
        bind_addr: format!("0.0.0.0:{}", parse_port(args)).parse()?,
        max_connections: parse_max_connections(args),
        ..Default::default()
    };

    info!("Starting BitPost realtime relay server...");
    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - Heartbeat interval: {:?}", config.heartbeat_interval);
    info!("  - Chat history limit: {}", config.chat_history_limit);

    let hub = Arc::new(Hub::new(
        config.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryProfiles::new()),
    ));

    hub.spawn_heartbeat();
    spawn_stats_reporter(Arc::clone(&hub));

    let server = RelayServer::bind(config, hub).await?;
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Log a stats snapshot once a minute
fn spawn_stats_reporter(hub: Arc<Hub>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = hub.stats().await;
            match serde_json::to_string(&stats) {
                Ok(json) => info!("stats: {}", json),
                Err(e) => error!("stats serialization failed: {}", e),
            }
        }
    });
}
