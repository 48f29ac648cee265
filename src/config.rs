use std::time::Duration;

use failure::format_err;
use libp2p::Multiaddr;

use crate::constants::*;

/// Runtime settings of one node, filled from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub listen: Multiaddr,
    // dialed on startup in addition to whatever mdns finds
    pub peers: Vec<Multiaddr>,
    pub difficulty: usize,
    pub actor_interval: Duration,
}

impl NodeConfig {
    pub fn new(listen: &str, peers: &[String], difficulty: usize, actor_interval_ms: u64) -> Result<NodeConfig, failure::Error> {
        let listen = listen
            .parse::<Multiaddr>()
            .map_err(|e| format_err!("invalid listen address {}: {}", listen, e))?;
        let peers = peers
            .iter()
            .map(|peer| {
                peer.parse::<Multiaddr>()
                    .map_err(|e| format_err!("invalid peer address {}: {}", peer, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if difficulty < MIN_DIFFICULTY {
            return Err(format_err!("difficulty must be at least {}", MIN_DIFFICULTY));
        }
        if actor_interval_ms == 0 {
            return Err(format_err!("actor interval must be positive"));
        }
        Ok(NodeConfig {
            listen,
            peers,
            difficulty,
            actor_interval: Duration::from_millis(actor_interval_ms),
        })
    }
}
