//! Grebe Game Server
//!
//! Runs the server for a single match between two players.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use grebe::{
    network::{GameServer, ServerConfig},
    GameRegistry, DEFAULT_MOVE_TIME_MS, DEFAULT_PORT, VERSION,
};

#[derive(Parser)]
#[command(name = "grebe-server")]
#[command(about = "Runs the server for a single match between two players")]
#[command(version)]
struct Cli {
    /// Name of the game to play
    game: String,

    /// Player 1's username
    p1: String,

    /// Player 2's username
    p2: String,

    /// The port to use
    #[arg(long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// The time limit per move in milliseconds
    #[arg(long, default_value_t = DEFAULT_MOVE_TIME_MS, value_parser = clap::value_parser!(u64).range(1..))]
    movetime: u64,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let registry = GameRegistry::builtin();
    let new_game = registry.constructor(&cli.game)?;

    let config = ServerConfig {
        bind_addr: SocketAddr::new(cli.host, cli.port),
        game: cli.game,
        p1_username: cli.p1,
        p2_username: cli.p2,
        move_time: Duration::from_millis(cli.movetime),
    };

    info!("Grebe Server v{}", VERSION);

    let server = GameServer::bind(config, new_game).await?;
    let result = server.run().await.context("match aborted")?;

    info!("Final result: {}", result);
    Ok(())
}
