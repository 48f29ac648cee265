mod behavior;
mod block;
mod blockchain;
mod cli;
mod config;
mod constants;
mod coordinator;
mod error;
mod mempool;
mod message;
mod mining;
mod server;
mod transaction;
mod wallet;

use env_logger::{Builder, Env};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<(), failure::Error> {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::new();
    cli.run().await
}
