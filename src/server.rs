use std::collections::HashSet;
use std::time::Duration;

use failure::format_err;
use futures::stream::StreamExt;
use libp2p::identify::Event as IdentifyEvent;
use libp2p::kad::{self, RoutingUpdate};
use libp2p::mdns::Event as MdnsEvent;
use libp2p::request_response::{
    Event as RequestResponseEvent,
    InboundFailure,
    Message as RequestResponseMessage,
    OutboundRequestId,
};
use libp2p::swarm::SwarmEvent;
use libp2p::{identity, noise, tcp, yamux, PeerId, Swarm};
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::behavior::{is_unsupported, BlockEvent, Behavior, ChainEvent, Event as AgentEvent, Role, TransactionEvent};
use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::NodeConfig;
use crate::constants::*;
use crate::coordinator::{PeerMessenger, SyncCoordinator};
use crate::transaction::Transaction;
use crate::wallet::Keypair;

/// Peers a node is connected to plus the snapshot requests of the
/// current round.
#[derive(Default)]
struct Peers {
    connected: HashSet<PeerId>,
    chain_requests: HashSet<OutboundRequestId>,
}

/// The coordinator's view of the swarm for one handler call.
struct Outbox<'a> {
    swarm: &'a mut Swarm<Behavior>,
    peers: &'a mut Peers,
}

impl PeerMessenger for Outbox<'_> {
    fn broadcast_block(&mut self, block: &Block) {
        for peer_id in &self.peers.connected {
            let request_id = self.swarm.behaviour_mut().send_block(peer_id, block.clone());
            debug!("send block {} to {} ({request_id})", block.hash, peer_id);
        }
    }

    fn request_chain(&mut self) -> usize {
        self.peers.chain_requests.clear();
        for peer_id in &self.peers.connected {
            info!("Requests blockchain from {}.", peer_id);
            let request_id = self.swarm.behaviour_mut().request_chain(peer_id);
            self.peers.chain_requests.insert(request_id);
        }
        self.peers.chain_requests.len()
    }
}

pub struct Server {
    role: Role,
    swarm: Swarm<Behavior>,
    peers: Peers,
}

impl Server {
    pub fn new(config: &NodeConfig, role: Role) -> Result<Server, failure::Error> {
        let local_key = identity::Keypair::generate_ed25519();
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(local_key)
            .with_tokio()
            .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)?
            .with_behaviour(|key| Behavior::new(key, role))
            .map_err(|e| format_err!("could not build network behaviour: {:?}", e))?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
            .build();

        info!("Local peer ID : {}", swarm.local_peer_id());
        swarm.listen_on(config.listen.clone())?;
        for remote in &config.peers {
            swarm.dial(remote.clone())?;
            info!("Dialed to: {remote}");
        }

        Ok(Server {
            role,
            swarm,
            peers: Peers::default(),
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Runs a mining node until ctrl-c.
    pub async fn run_miner(mut self, chain: Blockchain) -> Result<(), failure::Error> {
        let (mut coordinator, mut mined) = SyncCoordinator::new(self.local_peer_id().to_string(), chain);
        info!("MinerNode started.");

        let bootstrap = tokio::time::sleep(BOOTSTRAP_DELAY);
        tokio::pin!(bootstrap);
        let mut started = false;
        let mut deadline = tokio::time::interval(Duration::from_secs(1));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_event(event, &mut coordinator),
                Some(outcome) = mined.recv() => {
                    let mut net = Outbox { swarm: &mut self.swarm, peers: &mut self.peers };
                    coordinator.handle_mined(outcome, &mut net);
                }
                _ = &mut bootstrap, if !started => {
                    started = true;
                    let mut net = Outbox { swarm: &mut self.swarm, peers: &mut self.peers };
                    coordinator.start(&mut net);
                }
                _ = deadline.tick(), if started => coordinator.check_resync_deadline(RESYNC_GRACE),
                _ = &mut shutdown => {
                    info!("Miner has been stopped.");
                    return Ok(());
                }
            }
        }
    }

    /// Runs a demo actor that signs and pushes a transaction every `interval`.
    pub async fn run_actor(mut self, interval: Duration) -> Result<(), failure::Error> {
        let keys = Keypair::generate();
        info!("ActorNode started with key {}", keys.public_hex());

        // first transaction goes out once discovery had a chance to run
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + ACTOR_WARMUP, interval);
        let mut sent = 0u64;
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_actor_event(event),
                _ = ticker.tick() => {
                    let transaction = demo_transaction(sent == 0);
                    match sign_checked(transaction, &keys) {
                        Ok(transaction) => {
                            self.broadcast_transaction(&transaction);
                            sent += 1;
                        }
                        Err(e) => error!("Invalid transaction: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Actor has been stopped.");
                    return Ok(());
                }
            }
        }
    }

    fn broadcast_transaction(&mut self, transaction: &Transaction) {
        for peer_id in &self.peers.connected {
            let request_id = self.swarm.behaviour_mut().send_transaction(peer_id, transaction.clone());
            debug!("send tx {} to {} ({request_id})", transaction.id, peer_id);
        }
    }

    /// Connection lifecycle and discovery, shared by both roles.
    fn handle_common(&mut self, event: SwarmEvent<AgentEvent>) -> Option<AgentEvent> {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => info!("NewListenAddr: {address}"),
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                info!("Connected: {peer_id} | {:?}", endpoint.get_remote_address());
                self.peers.connected.insert(peer_id);
            }
            SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                if num_established == 0 {
                    info!("Disconnected: {peer_id}");
                    self.peers.connected.remove(&peer_id);
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!("outgoing connection error {peer_id:?}: {error}")
            }
            SwarmEvent::IncomingConnectionError { error, .. } => warn!("incoming connection error: {error}"),
            SwarmEvent::Behaviour(AgentEvent::Mdns(MdnsEvent::Discovered(found))) => {
                for (peer_id, addr) in found {
                    if self.peers.connected.contains(&peer_id) {
                        continue;
                    }
                    debug!("Discovered: {peer_id} | {addr}");
                    if let Err(e) = self.swarm.dial(addr) {
                        debug!("could not dial {peer_id}: {e}");
                    }
                }
            }
            SwarmEvent::Behaviour(AgentEvent::Mdns(MdnsEvent::Expired(_))) => {}
            SwarmEvent::Behaviour(AgentEvent::Identify(IdentifyEvent::Received { peer_id, info, .. })) => {
                debug!("IdentifyEvent:Received: {peer_id} | {}", info.protocol_version);
                for addr in info.listen_addrs {
                    match self.swarm.behaviour_mut().register_addr_kad(&peer_id, addr.clone()) {
                        RoutingUpdate::Failed => error!("IdentifyReceived: Failed to register address to Kademlia"),
                        RoutingUpdate::Pending => debug!("IdentifyReceived: Register address pending"),
                        RoutingUpdate::Success => debug!("IdentifyReceived: {addr}: Success register address"),
                    }
                }
            }
            SwarmEvent::Behaviour(AgentEvent::Identify(_)) => {}
            SwarmEvent::Behaviour(AgentEvent::Kad(kad::Event::RoutingUpdated { peer, is_new_peer, .. })) => {
                debug!("KadEvent:RoutingUpdated: {peer} | IsNewPeer? {is_new_peer}")
            }
            SwarmEvent::Behaviour(AgentEvent::Kad(_)) => {}
            SwarmEvent::Behaviour(event) => return Some(event),
            _ => {}
        }
        None
    }

    fn handle_actor_event(&mut self, event: SwarmEvent<AgentEvent>) {
        match self.handle_common(event) {
            Some(AgentEvent::Transaction(RequestResponseEvent::OutboundFailure { peer, error, .. })) => {
                if !is_unsupported(&error) {
                    warn!("Transaction could not be send to {peer}: {error}");
                }
            }
            Some(other) => debug!("{:?} ignored by {:?} node", other, self.role),
            None => {}
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<AgentEvent>, coordinator: &mut SyncCoordinator) {
        match self.handle_common(event) {
            Some(AgentEvent::Transaction(event)) => self.handle_transaction_event(event, coordinator),
            Some(AgentEvent::Block(event)) => self.handle_block_event(event, coordinator),
            Some(AgentEvent::Chain(event)) => self.handle_chain_event(event, coordinator),
            Some(_) | None => {}
        }
    }

    fn handle_transaction_event(&mut self, event: TransactionEvent, coordinator: &mut SyncCoordinator) {
        match event {
            RequestResponseEvent::Message {
                message: RequestResponseMessage::Request { request, channel, .. },
                ..
            } => {
                self.swarm.behaviour_mut().ack_transaction(channel);
                coordinator.handle_transaction(request);
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => log_inbound_failure("transaction", &peer, &error),
            _ => {}
        }
    }

    fn handle_block_event(&mut self, event: BlockEvent, coordinator: &mut SyncCoordinator) {
        match event {
            RequestResponseEvent::Message {
                peer,
                message: RequestResponseMessage::Request { request, channel, .. },
                ..
            } => {
                debug!("receive block {} from {}", request.hash, peer);
                self.swarm.behaviour_mut().ack_block(channel);
                let mut net = Outbox {
                    swarm: &mut self.swarm,
                    peers: &mut self.peers,
                };
                coordinator.handle_block(request, &mut net);
            }
            RequestResponseEvent::OutboundFailure { peer, error, .. } => {
                if !is_unsupported(&error) {
                    warn!("Block could not be send to {peer}: {error}");
                }
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => log_inbound_failure("block", &peer, &error),
            _ => {}
        }
    }

    fn handle_chain_event(&mut self, event: ChainEvent, coordinator: &mut SyncCoordinator) {
        match event {
            RequestResponseEvent::Message { peer, message, .. } => match message {
                RequestResponseMessage::Request { channel, .. } => {
                    debug!("Blockchain requested by {peer}.");
                    let snapshot = coordinator.handle_chain_request();
                    if !self.swarm.behaviour_mut().send_chain(channel, snapshot) {
                        warn!("Blockchain could not be send to {peer}");
                    }
                }
                RequestResponseMessage::Response { request_id, response } => {
                    info!("received blockchain of {} blocks from {}", response.len(), peer);
                    coordinator.handle_chain_snapshot(response);
                    if self.peers.chain_requests.remove(&request_id) {
                        coordinator.snapshot_round_progress();
                    }
                }
            },
            RequestResponseEvent::OutboundFailure { peer, request_id, error, .. } => {
                if !is_unsupported(&error) {
                    warn!("Blockchain could not be requested from {peer}: {error}");
                }
                if self.peers.chain_requests.remove(&request_id) {
                    coordinator.snapshot_round_progress();
                }
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => log_inbound_failure("blockchain", &peer, &error),
            RequestResponseEvent::ResponseSent { peer, .. } => debug!("Blockchain send to {peer}."),
        }
    }
}

fn log_inbound_failure(channel: &str, peer: &PeerId, error: &InboundFailure) {
    match error {
        InboundFailure::UnsupportedProtocols => {}
        // includes payloads that failed to decode
        other => warn!("{channel} message from {peer} dropped: {other}"),
    }
}

const DEMO_NAMES: &[&str] = &[
    "Max", "Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace", "Heidi", "Ivan", "Judy", "Mallory",
];

fn demo_transaction(first: bool) -> Transaction {
    let id = uuid::Uuid::new_v4().to_string();
    if first {
        return Transaction::new(id, "Block Reward", "Max", 50.0);
    }
    let mut rng = rand::thread_rng();
    let sender = DEMO_NAMES.choose(&mut rng).copied().unwrap_or("Alice");
    let recipient = DEMO_NAMES.choose(&mut rng).copied().unwrap_or("Bob");
    Transaction::new(id, sender, recipient, rng.gen_range(0.0..100_000.0))
}

/// Signs with `keys` and refuses to hand out a transaction that does not
/// verify against the matching public key.
fn sign_checked(mut transaction: Transaction, keys: &Keypair) -> Result<Transaction, failure::Error> {
    transaction.sign(&keys.secret_bytes())?;
    if !transaction.verify(&keys.public_bytes())? {
        return Err(format_err!("signature of {} does not verify", transaction.id));
    }
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_demo_transaction_is_reward() {
        let tx = demo_transaction(true);
        assert_eq!(tx.sender, "Block Reward");
        assert_eq!(tx.recipient, "Max");
        assert_eq!(tx.amount, 50.0);
    }

    #[test]
    fn test_demo_transactions_are_signed() {
        let keys = Keypair::generate();
        let tx = sign_checked(demo_transaction(false), &keys).unwrap();
        assert!(tx.verify(&keys.public_bytes()).unwrap());
        assert!(tx.amount >= 0.0 && tx.amount < 100_000.0);
        assert!(!tx.id.is_empty());
    }
}
