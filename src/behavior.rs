use libp2p::identify::{
    Behaviour as IdentifyBehavior,
    Config as IdentifyConfig,
    Event as IdentifyEvent,
};
use libp2p::identity::Keypair;
use libp2p::kad::{
    self,
    Behaviour as KademliaBehavior,
    Event as KademliaEvent,
    RoutingUpdate,
    store::MemoryStore as KademliaInMemory,
};
use libp2p::mdns::{self, Event as MdnsEvent};
use libp2p::request_response::cbor::Behaviour as RequestResponseBehavior;
use libp2p::request_response::{
    self,
    Config as RequestResponseConfig,
    Event as RequestResponseEvent,
    OutboundRequestId,
    ProtocolSupport,
    ResponseChannel,
};
use libp2p::swarm::NetworkBehaviour;
use libp2p::{Multiaddr, PeerId, StreamProtocol};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::constants::*;
use crate::message::{Ack, ChainRequest};
use crate::transaction::Transaction;

/// What a node runs: miners serve every channel, actors only push
/// transactions and accept nothing inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Miner,
    Actor,
}

pub(crate) type TransactionEvent = RequestResponseEvent<Transaction, Ack>;
pub(crate) type BlockEvent = RequestResponseEvent<Block, Ack>;
pub(crate) type ChainEvent = RequestResponseEvent<ChainRequest, Blockchain>;

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "Event")]
pub(crate) struct Behavior {
    identify: IdentifyBehavior,
    kad: KademliaBehavior<KademliaInMemory>,
    mdns: mdns::tokio::Behaviour,
    transactions: RequestResponseBehavior<Transaction, Ack>,
    blocks: RequestResponseBehavior<Block, Ack>,
    chain: RequestResponseBehavior<ChainRequest, Blockchain>,
}

fn channel<Req, Resp>(protocol: StreamProtocol, support: ProtocolSupport) -> RequestResponseBehavior<Req, Resp>
where
    Req: Send + serde::Serialize + serde::de::DeserializeOwned + 'static,
    Resp: Send + serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    let config = RequestResponseConfig::default().with_request_timeout(REQUEST_TIMEOUT);
    RequestResponseBehavior::new([(protocol, support)], config)
}

impl Behavior {
    pub fn new(key: &Keypair, role: Role) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let local_peer_id = PeerId::from(key.public());

        let kad_config = kad::Config::new(KAD_PROTOCOL);
        let mut kad = KademliaBehavior::with_config(local_peer_id, KademliaInMemory::new(local_peer_id), kad_config);
        kad.set_mode(Some(kad::Mode::Server));

        let identify = IdentifyBehavior::new(
            IdentifyConfig::new(IDENTIFY_PROTOCOL.to_string(), key.public())
                .with_push_listen_addr_updates(true)
                .with_interval(std::time::Duration::from_secs(30)),
        );

        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

        let inbound = match role {
            Role::Miner => ProtocolSupport::Full,
            Role::Actor => ProtocolSupport::Outbound,
        };

        Ok(Self {
            identify,
            kad,
            mdns,
            transactions: channel(TRANSACTION_PROTOCOL, inbound.clone()),
            blocks: channel(BLOCK_PROTOCOL, inbound.clone()),
            chain: channel(BLOCKCHAIN_PROTOCOL, inbound),
        })
    }

    pub fn register_addr_kad(&mut self, peer_id: &PeerId, addr: Multiaddr) -> RoutingUpdate {
        self.kad.add_address(peer_id, addr)
    }

    pub fn send_transaction(&mut self, peer_id: &PeerId, transaction: Transaction) -> OutboundRequestId {
        self.transactions.send_request(peer_id, transaction)
    }

    pub fn send_block(&mut self, peer_id: &PeerId, block: Block) -> OutboundRequestId {
        self.blocks.send_request(peer_id, block)
    }

    pub fn request_chain(&mut self, peer_id: &PeerId) -> OutboundRequestId {
        self.chain.send_request(peer_id, ChainRequest)
    }

    pub fn ack_transaction(&mut self, channel: ResponseChannel<Ack>) -> bool {
        self.transactions.send_response(channel, Ack).is_ok()
    }

    pub fn ack_block(&mut self, channel: ResponseChannel<Ack>) -> bool {
        self.blocks.send_response(channel, Ack).is_ok()
    }

    pub fn send_chain(&mut self, channel: ResponseChannel<Blockchain>, snapshot: Blockchain) -> bool {
        self.chain.send_response(channel, snapshot).is_ok()
    }
}

#[derive(Debug)]
pub(crate) enum Event {
    Identify(IdentifyEvent),
    Kad(KademliaEvent),
    Mdns(MdnsEvent),
    Transaction(TransactionEvent),
    Block(BlockEvent),
    Chain(ChainEvent),
}

impl From<IdentifyEvent> for Event {
    fn from(value: IdentifyEvent) -> Self {
        Self::Identify(value)
    }
}

impl From<KademliaEvent> for Event {
    fn from(value: KademliaEvent) -> Self {
        Self::Kad(value)
    }
}

impl From<MdnsEvent> for Event {
    fn from(value: MdnsEvent) -> Self {
        Self::Mdns(value)
    }
}

impl From<TransactionEvent> for Event {
    fn from(value: TransactionEvent) -> Self {
        Self::Transaction(value)
    }
}

impl From<BlockEvent> for Event {
    fn from(value: BlockEvent) -> Self {
        Self::Block(value)
    }
}

impl From<ChainEvent> for Event {
    fn from(value: ChainEvent) -> Self {
        Self::Chain(value)
    }
}

/// Failures that only mean the remote does not speak this channel.
pub(crate) fn is_unsupported(error: &request_response::OutboundFailure) -> bool {
    matches!(error, request_response::OutboundFailure::UnsupportedProtocols)
}
