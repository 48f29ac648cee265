use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::message::Payload;
use crate::mining::MiningStatus;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    // local chain not trusted yet, no mining
    Bootstrapping,
    Ready,
}

/// Result of one mining attempt, `None` when it was cancelled.
pub type MiningOutcome = Option<Block>;

/// Outbound side of the peer protocol as the coordinator sees it.
pub trait PeerMessenger {
    /// Pushes a block to every connected peer.
    fn broadcast_block(&mut self, block: &Block);

    /// Sends a chain-snapshot request to every connected peer and returns
    /// how many requests went out.
    fn request_chain(&mut self) -> usize;
}

/// Node protocol state machine.
///
/// It is the only writer of the chain and the pool. Mining runs on a spawned
/// task over a snapshot and reports back through the channel returned by
/// [`SyncCoordinator::new`]; the owner feeds those outcomes to
/// [`SyncCoordinator::handle_mined`].
pub struct SyncCoordinator {
    local_id: String,
    chain: Blockchain,
    state: NodeState,
    receiving_block: bool,
    mining_in_flight: bool,
    status: MiningStatus,
    pending_snapshots: usize,
    resync_started: Option<Instant>,
    mined: UnboundedSender<MiningOutcome>,
}

impl SyncCoordinator {
    pub fn new(local_id: impl Into<String>, chain: Blockchain) -> (SyncCoordinator, UnboundedReceiver<MiningOutcome>) {
        let (mined, outcomes) = mpsc::unbounded_channel();
        let coordinator = SyncCoordinator {
            local_id: local_id.into(),
            chain,
            state: NodeState::Bootstrapping,
            receiving_block: false,
            mining_in_flight: false,
            status: MiningStatus::new(),
            pending_snapshots: 0,
            resync_started: None,
            mined,
        };
        (coordinator, outcomes)
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn is_mining(&self) -> bool {
        self.mining_in_flight
    }

    #[cfg(test)]
    pub fn is_receiving_block(&self) -> bool {
        self.receiving_block
    }

    /// First snapshot round after the node came up.
    pub fn start<M: PeerMessenger>(&mut self, net: &mut M) {
        info!("node {} starts synchronizing", self.local_id);
        self.begin_resync(net);
    }

    fn begin_resync<M: PeerMessenger>(&mut self, net: &mut M) {
        self.state = NodeState::Bootstrapping;
        self.resync_started = Some(Instant::now());
        self.pending_snapshots = net.request_chain();
        info!("Requests blockchain from {} peers", self.pending_snapshots);
        if self.pending_snapshots == 0 {
            self.finish_resync();
        }
    }

    /// One snapshot request of the current round answered or failed.
    pub fn snapshot_round_progress(&mut self) {
        self.pending_snapshots = self.pending_snapshots.saturating_sub(1);
        if self.pending_snapshots == 0 {
            self.finish_resync();
        }
    }

    /// Closes a snapshot round that has been open longer than `grace`.
    pub fn check_resync_deadline(&mut self, grace: Duration) {
        if let Some(started) = self.resync_started {
            if started.elapsed() >= grace {
                warn!("{} snapshot requests still open, leaving setup mode", self.pending_snapshots);
                self.finish_resync();
            }
        }
    }

    pub fn finish_resync(&mut self) {
        if self.state == NodeState::Bootstrapping {
            info!("Blockchain was updated, {} blocks", self.chain.len());
        }
        self.state = NodeState::Ready;
        self.pending_snapshots = 0;
        self.resync_started = None;
    }

    pub fn handle_transaction(&mut self, transaction: Transaction) {
        if let Err(e) = transaction.check() {
            warn!("dropping transaction: {}", e);
            return;
        }
        debug!("received transaction {}", transaction.id);
        self.chain.transaction_pool_mut().add_transaction(transaction);
        self.try_start_mining();
    }

    fn try_start_mining(&mut self) {
        if self.state != NodeState::Ready || self.mining_in_flight || self.receiving_block {
            return;
        }
        self.mining_in_flight = true;
        let job = self.chain.start_mining(&self.status);
        let mined = self.mined.clone();
        tokio::spawn(async move {
            if mined.send(job.await).is_err() {
                debug!("node stopped before mining finished");
            }
        });
    }

    /// Commits and broadcasts a block mined by this node.
    pub fn handle_mined<M: PeerMessenger>(&mut self, outcome: MiningOutcome, net: &mut M) {
        self.mining_in_flight = false;
        let mut block = match outcome {
            Some(block) => block,
            None => {
                info!("Current block was destroyed.");
                return;
            }
        };
        block.set_miner(self.local_id.clone());
        match self.chain.add_block(block.clone()) {
            Ok(()) => {
                net.broadcast_block(&block);
                debug!("{}", self.chain);
            }
            Err(e) => warn!("discarding own block {}: {}", block.hash, e),
        }
    }

    /// A block pushed by a peer. Cancels local mining; a block that does not
    /// extend the local tip throws the node back into setup mode.
    pub fn handle_block<M: PeerMessenger>(&mut self, block: Block, net: &mut M) {
        if let Err(e) = block.check() {
            warn!("dropping block: {}", e);
            return;
        }
        // keeps mining from starting off anything apply_block triggers
        self.receiving_block = true;
        self.status.stop();
        self.apply_block(block, net);
        self.receiving_block = false;
    }

    fn apply_block<M: PeerMessenger>(&mut self, block: Block, net: &mut M) {
        if let Some(tip) = self.chain.latest_block() {
            if block.previous_hash != tip.hash {
                warn!("Hash does not match. Switch to setup mode.");
                self.begin_resync(net);
                return;
            }
        }
        if let Err(e) = self.chain.add_block(block) {
            warn!("could not add block: {}", e);
        }
    }

    pub fn handle_chain_request(&self) -> Blockchain {
        self.chain.clone()
    }

    /// Replays a peer's chain block by block onto the local one. Blocks that
    /// do not link or validate are skipped and nothing is rolled back.
    pub fn handle_chain_snapshot(&mut self, snapshot: Blockchain) {
        if let Err(e) = snapshot.check() {
            warn!("dropping chain snapshot: {}", e);
            return;
        }
        let blocks = snapshot.into_chain();
        let total = blocks.len();
        let mut applied = 0;
        for block in blocks {
            let depth = block.depth;
            match self.chain.add_block(block) {
                Ok(()) => applied += 1,
                Err(e) => debug!("skipping block {} from snapshot: {}", depth, e),
            }
        }
        info!("Chain initialized: {} of {} received blocks applied", applied, total);
        if !self.chain.is_valid() {
            warn!("local chain does not verify after import");
        }
    }
}
