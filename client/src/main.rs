use clap::Parser;
use client::network::Client;
use client::rendering::{final_scores, render_board, scoreboard};
use log::{info, warn};
use shared::Registry;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless snake client", long_about = None)]
struct Args {
    /// Print live servers from the registry and exit
    #[arg(long)]
    list: bool,

    /// Server port; defaults to the first live registry entry
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Registry file, defaults to $SNAKE_REGISTRY or the temp dir
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Maximum number of entries shown by --list
    #[arg(long, default_value = "16")]
    max: usize,

    /// Print the board with every status update
    #[arg(long)]
    board: bool,

    /// Seconds between status updates
    #[arg(long, default_value = "1")]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let registry = match &args.registry {
        Some(path) => Registry::new(path.clone()),
        None => Registry::from_env(),
    };

    if args.list {
        let servers = registry.list(args.max)?;
        if servers.is_empty() {
            println!("No live servers in {}", registry.path().display());
        }
        for server in servers {
            println!("{}", server);
        }
        return Ok(());
    }

    let port = match args.port {
        Some(port) => port,
        None => match registry.list(1)?.first() {
            Some(server) => server.port,
            None => return Err("no live servers registered; pass --port".into()),
        },
    };

    let address = format!("{}:{}", args.host, port);
    info!("Connecting to: {}", address);
    let client = Client::connect(address.as_str()).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving");
                client.leave().await?;
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let latest = client.latest();
        if let Some(end) = &latest.game_end {
            println!("{}", final_scores(end));
            return Ok(());
        }
        if let Some(snapshot) = &latest.snapshot {
            println!("{}", scoreboard(snapshot, Some(client.slot())));
            if args.board {
                println!("{}", render_board(snapshot));
            }
        }
        if !latest.connected {
            warn!("Disconnected from server");
            return Ok(());
        }
    }
}
