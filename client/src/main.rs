use clap::Parser;
use client::network::{BoxError, Client, ClientConfig};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Shift the local clock by this many milliseconds
    #[arg(short = 'k', long, default_value = "0", allow_hyphen_values = true)]
    clock_skew_ms: i64,

    /// Milliseconds between submitted commands, 0 to only listen
    #[arg(short = 'c', long, default_value = "3000")]
    command_interval_ms: u64,

    /// Message body of submitted commands
    #[arg(short = 'm', long, default_value = "General Command")]
    message: String,

    /// Request an immediate probe round after connecting
    #[arg(long)]
    start_ping: bool,

    /// Resume a previous session id instead of connecting fresh
    #[arg(long)]
    resume: Option<u32>,

    /// Exit after this many seconds
    #[arg(long)]
    run_for_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    if args.clock_skew_ms != 0 {
        info!("Local clock skewed by {}ms", args.clock_skew_ms);
    }

    let config = ClientConfig {
        server_addr: args.server,
        fake_ping_ms: args.fake_ping,
        clock_skew_ms: args.clock_skew_ms,
        command_interval: Duration::from_millis(args.command_interval_ms),
        message: args.message,
        start_ping: args.start_ping,
        resume_session: args.resume,
        run_for: args.run_for_secs.map(Duration::from_secs),
    };

    let mut client = Client::new(config).await?;
    client.run().await?;

    let state = client.state();
    let stats = &state.stats;
    info!(
        "Submitted {}, relayed {}, rejected {}, received {}",
        stats.submitted,
        stats.accepted,
        stats.rejected,
        stats.len()
    );
    if let Some(own) = state.own_estimate() {
        info!(
            "Final offset estimate {}ms (roundtrip {}ms)",
            own.client_offset_ms, own.roundtrip_ms
        );
    }
    if let Some(mean) = stats.mean_lateness_ms() {
        info!("Mean lateness {:.1}ms", mean);
    }

    Ok(())
}
