use clap::Parser;
use log::{error, info};
use server::config::{GameMode, ServerConfig, WorldKind};
use server::network::Server;
use shared::Registry;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multiplayer snake server", long_about = None)]
struct Args {
    /// Board width in cells (10..=120)
    #[arg(long = "w", default_value = "40")]
    width: i32,

    /// Board height in cells (10..=60)
    #[arg(long = "h", default_value = "20")]
    height: i32,

    /// Match end rule
    #[arg(long, value_enum, default_value = "standard")]
    mode: GameMode,

    /// Match length in seconds for timed mode
    #[arg(long, default_value = "60")]
    time: u64,

    /// Open wrapping board or obstacles from a map file
    #[arg(long, value_enum, default_value = "no_obs")]
    world: WorldKind,

    /// Obstacle map, required with --world obs_file
    #[arg(long)]
    map: Option<PathBuf>,

    /// Maximum number of players (1..=8)
    #[arg(long, default_value = "4")]
    max: usize,

    /// Port to listen on, 0 lets the OS pick
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Registry file, defaults to $SNAKE_REGISTRY or the temp dir
    #[arg(long)]
    registry: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            width: self.width,
            height: self.height,
            mode: self.mode,
            duration: Duration::from_secs(self.time),
            world: self.world,
            map_path: self.map.clone(),
            max_players: self.max,
            port: self.port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let registry = match &args.registry {
        Some(path) => Registry::new(path.clone()),
        None => Registry::from_env(),
    };

    let server = match Server::bind(args.config(), Some(registry)).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e);
        }
    };

    let config = server.config();
    println!(
        "SERVER PID={} PORT={} w={} h={} mode={} world={} max={}",
        std::process::id(),
        server.port(),
        config.width,
        config.height,
        config.mode,
        config.world,
        config.max_players
    );

    let end = server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await
                }
            }
        })
        .await?;

    info!("Final scores: {:?}", end.scores);
    Ok(())
}
