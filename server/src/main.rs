use chrono::TimeDelta;
use clap::Parser;
use log::{error, info};
use server::config::{LatencyRange, ServerConfig};
use server::network::{BoxError, Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent sessions
    #[arg(short, long, default_value = "32")]
    max_sessions: usize,

    /// Interval between probe rounds in milliseconds
    #[arg(long, default_value = "5000")]
    ping_interval_ms: u64,

    /// Simulated delay before each probe is pushed
    #[arg(long, default_value = "0")]
    probe_delay_ms: u64,

    /// Simulated delay before each pong is timestamped
    #[arg(long, default_value = "0")]
    pong_delay_ms: u64,

    /// Commands at least this old on arrival are rejected
    #[arg(long, default_value = "1000")]
    staleness_ms: i64,

    #[arg(long, default_value = "500")]
    uplink_min_ms: u64,

    #[arg(long, default_value = "1500")]
    uplink_max_ms: u64,

    #[arg(long, default_value = "0")]
    downlink_min_ms: u64,

    #[arg(long, default_value = "500")]
    downlink_max_ms: u64,

    /// Seconds of silence before a session is dropped
    #[arg(long, default_value = "10")]
    session_timeout_secs: u64,

    /// Probes kept answerable before the oldest are evicted
    #[arg(long, default_value = "10000")]
    ledger_capacity: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: format!("{}:{}", args.host, args.port),
            max_sessions: args.max_sessions,
            session_timeout: Duration::from_secs(args.session_timeout_secs),
            ping_interval: Duration::from_millis(args.ping_interval_ms),
            probe_delay: Duration::from_millis(args.probe_delay_ms),
            pong_delay: Duration::from_millis(args.pong_delay_ms),
            ledger_capacity: args.ledger_capacity,
            staleness_threshold: TimeDelta::milliseconds(args.staleness_ms),
            uplink_latency: LatencyRange::new(args.uplink_min_ms, args.uplink_max_ms),
            downlink_latency: LatencyRange::new(args.downlink_min_ms, args.downlink_max_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ServerConfig::from(Args::parse());
    info!("Starting server on {}", config.bind_addr);

    let mut server = Server::new(config).await?;
    let shutdown = server.shutdown_sender();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = shutdown.send(ServerMessage::Shutdown) {
                error!("Failed to signal shutdown: {}", e);
            }
        }
    });

    server.run().await?;

    Ok(())
}
