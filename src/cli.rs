use clap::{arg, value_parser, ArgAction, ArgMatches, Command};

use crate::behavior::Role;
use crate::blockchain::Blockchain;
use crate::config::NodeConfig;
use crate::constants::*;
use crate::server::Server;

pub struct Cli {
    matches: ArgMatches,
}

fn command() -> Command {
    let network_args = [
        arg!(--listen <ADDR> "multiaddr to listen on").default_value(DEFAULT_LISTEN_ADDR),
        arg!(--peer <MULTIADDR> "peer to dial on startup, may be repeated").action(ArgAction::Append),
    ];
    Command::new("powchain")
        .version("0.1")
        .about("a proof-of-work ledger replicated over libp2p")
        .subcommand_required(true)
        .subcommand(
            Command::new("miner")
                .about("start a mining node")
                .args(network_args.clone())
                .arg(
                    arg!(--difficulty <N> "difficulty of the first block")
                        .value_parser(value_parser!(usize))
                        .default_value("5"),
                ),
        )
        .subcommand(
            Command::new("actor")
                .about("start a node that sends signed demo transactions")
                .args(network_args)
                .arg(
                    arg!(--"interval-ms" <MS> "milliseconds between transactions")
                        .value_parser(value_parser!(u64))
                        .default_value("200"),
                ),
        )
}

impl Cli {
    pub fn new() -> Cli {
        Cli {
            matches: command().get_matches(),
        }
    }

    pub async fn run(&self) -> Result<(), failure::Error> {
        match self.matches.subcommand() {
            Some(("miner", matches)) => {
                let config = node_config(matches)?;
                let server = Server::new(&config, Role::Miner)?;
                server.run_miner(Blockchain::with_difficulty(config.difficulty)).await
            }
            Some(("actor", matches)) => {
                let config = node_config(matches)?;
                let server = Server::new(&config, Role::Actor)?;
                server.run_actor(config.actor_interval).await
            }
            _ => Ok(()),
        }
    }
}

fn node_config(matches: &ArgMatches) -> Result<NodeConfig, failure::Error> {
    let listen = matches
        .get_one::<String>("listen")
        .map(String::as_str)
        .unwrap_or(DEFAULT_LISTEN_ADDR);
    let peers: Vec<String> = matches
        .get_many::<String>("peer")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let difficulty = matches
        .try_get_one::<usize>("difficulty")
        .ok()
        .flatten()
        .copied()
        .unwrap_or(DEFAULT_DIFFICULTY);
    let interval = matches
        .try_get_one::<u64>("interval-ms")
        .ok()
        .flatten()
        .copied()
        .unwrap_or(DEFAULT_ACTOR_INTERVAL_MS);
    NodeConfig::new(listen, &peers, difficulty, interval)
}
