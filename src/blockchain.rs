use std::fmt;
use std::future::Future;
use std::time::Instant;

use log::{info, warn};

use crate::block::Block;
use crate::constants::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY, MIN_DIFFICULTY, TARGET_DURATION};
use crate::error::ChainError;
use crate::mempool::TransactionPool;
use crate::mining::{self, MiningStatus};

/// In-memory chain plus the pending pool and the difficulty for the next
/// block. The whole value is also the chain-snapshot payload peers exchange.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blockchain {
    chain: Vec<Block>,
    transaction_pool: TransactionPool,
    difficulty: usize,
}

impl Blockchain {
    /// Empty chain, no genesis block is generated.
    pub fn new() -> Blockchain {
        Blockchain::with_difficulty(DEFAULT_DIFFICULTY)
    }

    pub fn with_difficulty(difficulty: usize) -> Blockchain {
        Blockchain {
            chain: Vec::new(),
            transaction_pool: TransactionPool::new(),
            difficulty: difficulty.max(MIN_DIFFICULTY),
        }
    }

    pub fn into_chain(self) -> Vec<Block> {
        self.chain
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn transaction_pool(&self) -> &TransactionPool {
        &self.transaction_pool
    }

    pub fn transaction_pool_mut(&mut self) -> &mut TransactionPool {
        &mut self.transaction_pool
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Commits `block` on top of the current tip.
    ///
    /// The pool is pruned and the difficulty retargeted before the block is
    /// checked, so a rejected block still has those effects.
    pub fn add_block(&mut self, block: Block) -> Result<(), ChainError> {
        self.transaction_pool.remove_transactions_by_id(block.transaction_ids());
        self.difficulty = next_difficulty(block.difficulty, block.mining_duration);

        info!(
            "Adds Block {{depth: {}, miner: {}, nonce: {}, timestamp: {}, valid: {}, difficulty: {}, miningDuration: {} }}",
            block.depth, block.miner, block.nonce, block.timestamp, block.valid, block.difficulty, block.mining_duration
        );

        // an empty chain takes anything as genesis
        if let Some(latest) = self.chain.last() {
            if block.previous_hash != latest.hash {
                return Err(ChainError::LinkMismatch {
                    expected: latest.hash.clone(),
                    found: block.previous_hash.clone(),
                });
            }
            if !block.is_valid() {
                return Err(ChainError::InvalidBlock { hash: block.hash.clone() });
            }
        }

        self.chain.push(block);
        Ok(())
    }

    /// Builds a candidate from a snapshot of the pool right now and returns
    /// the search as an owned future. Transactions arriving after this call
    /// are not part of the candidate.
    ///
    /// The future resolves to the mined block, or `None` if `status` was
    /// cleared before the target was met.
    pub fn start_mining(&self, status: &MiningStatus) -> impl Future<Output = Option<Block>> + Send + 'static {
        status.start();
        let parent = match self.latest_block() {
            Some(latest) => latest.depth.checked_add(1).map(|depth| (latest.hash.clone(), depth)),
            None => Some((String::new(), 0)),
        };
        let candidate =
            parent.map(|(previous_hash, depth)| Block::new(self.transaction_pool.snapshot(), previous_hash, depth));
        let difficulty = self.difficulty;
        let status = status.clone();

        async move {
            let mut block = match candidate {
                Some(block) => block,
                None => {
                    warn!("tip is at the maximum depth, nothing to mine on top of it");
                    status.stop();
                    return None;
                }
            };
            let started = Instant::now();
            let mined = mining::mine(&mut block, difficulty, &status).await;
            status.stop();
            if !mined {
                return None;
            }
            let seconds = started.elapsed().as_secs_f64();
            block.set_mining_duration(seconds);
            info!("Mining took {} seconds", seconds);
            Some(block)
        }
    }

    /// Pairwise scan of hash integrity and linkage. Genesis is not checked.
    pub fn is_valid(&self) -> bool {
        for pair in self.chain.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if current.hash != current.calculate_hash() {
                warn!("block {} has a stale hash", current.depth);
                return false;
            }
            if current.previous_hash != previous.hash {
                warn!("block {} is not linked to its predecessor", current.depth);
                return false;
            }
        }
        true
    }
}

/// Difficulty for the block after one that took `mining_duration` seconds.
pub fn next_difficulty(difficulty: usize, mining_duration: f64) -> usize {
    if mining_duration < TARGET_DURATION * 0.5 {
        difficulty.saturating_add(1).min(MAX_DIFFICULTY)
    } else if mining_duration > TARGET_DURATION * 1.5 {
        difficulty.saturating_sub(1).max(MIN_DIFFICULTY)
    } else {
        difficulty
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Blockchain {{")?;
        for block in &self.chain {
            writeln!(f, "{}", block)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;

    fn tx(id: &str, amount: f64) -> Transaction {
        Transaction::new(id, "alice", "bob", amount)
    }

    async fn mine_next(bc: &Blockchain) -> Block {
        let status = MiningStatus::new();
        bc.start_mining(&status).await.expect("mining was not cancelled")
    }

    async fn build_chain(blocks: usize) -> Blockchain {
        let mut bc = Blockchain::with_difficulty(1);
        for i in 0..blocks {
            bc.transaction_pool_mut().add_transaction(tx(&format!("tx-{i}"), i as f64));
            let mut block = mine_next(&bc).await;
            // keep the tests fast by pinning difficulty
            block.set_mining_duration(TARGET_DURATION);
            bc.add_block(block).unwrap();
        }
        bc
    }

    #[test]
    fn test_next_difficulty() {
        assert_eq!(next_difficulty(3, 10.0), 4);
        assert_eq!(next_difficulty(3, 100.0), 2);
        assert_eq!(next_difficulty(1, 100.0), 1);
        assert_eq!(next_difficulty(3, 60.0), 3);
        assert_eq!(next_difficulty(3, 30.0), 3);
        assert_eq!(next_difficulty(3, 90.0), 3);
    }

    #[test]
    fn test_next_difficulty_is_capped() {
        assert_eq!(next_difficulty(MAX_DIFFICULTY, 0.0), MAX_DIFFICULTY);
        assert_eq!(next_difficulty(usize::MAX, 0.0), MAX_DIFFICULTY);
    }

    #[tokio::test]
    async fn test_start_mining_on_deepest_tip_gives_up() {
        let mut bc = Blockchain::with_difficulty(1);
        bc.add_block(Block::new_at(vec![], String::new(), u64::MAX, 1)).unwrap();
        bc.transaction_pool_mut().add_transaction(tx("A", 1.0));
        let status = MiningStatus::new();
        assert!(bc.start_mining(&status).await.is_none());
        assert!(!status.is_mining());
    }

    #[test]
    fn test_add_block_retargets_difficulty() {
        let mut bc = Blockchain::with_difficulty(4);
        let mut genesis = Block::new_at(vec![], String::new(), 0, 1);
        genesis.difficulty = 4;
        genesis.set_mining_duration(10.0);
        bc.add_block(genesis).unwrap();
        assert_eq!(bc.difficulty(), 5);

        let mut bc = Blockchain::with_difficulty(1);
        let mut genesis = Block::new_at(vec![], String::new(), 0, 1);
        genesis.difficulty = 1;
        genesis.set_mining_duration(100.0);
        bc.add_block(genesis).unwrap();
        assert_eq!(bc.difficulty(), 1);
    }

    #[test]
    fn test_genesis_is_appended_unconditionally() {
        let mut bc = Blockchain::new();
        let genesis = Block::new_at(vec![tx("A", 1.0)], String::new(), 0, 1);
        bc.add_block(genesis).unwrap();
        assert_eq!(bc.len(), 1);
    }

    #[test]
    fn test_add_block_prunes_pool_by_id() {
        let mut bc = Blockchain::new();
        bc.transaction_pool_mut().add_transaction(tx("A", 1.0));
        bc.transaction_pool_mut().add_transaction(tx("B", 2.0));
        bc.transaction_pool_mut().add_transaction(tx("C", 3.0));
        let block = Block::new_at(vec![tx("A", 1.0), tx("B", 2.0)], String::new(), 0, 1);
        bc.add_block(block).unwrap();
        let ids: Vec<&str> = bc.transaction_pool().transactions().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["C"]);
    }

    #[tokio::test]
    async fn test_link_mismatch_is_rejected() {
        let mut bc = build_chain(1).await;
        let mut orphan = Block::new_at(vec![], "not-the-tip".to_string(), 1, 2);
        orphan.difficulty = 1;
        let err = bc.add_block(orphan).unwrap_err();
        assert!(matches!(err, ChainError::LinkMismatch { .. }));
        assert_eq!(bc.len(), 1);
    }

    #[tokio::test]
    async fn test_unmined_block_is_rejected() {
        let mut bc = build_chain(1).await;
        let tip = bc.latest_block().unwrap().hash.clone();
        let mut block = Block::new_at(vec![], tip, 1, 2);
        block.difficulty = 64;
        let err = bc.add_block(block).unwrap_err();
        assert!(matches!(err, ChainError::InvalidBlock { .. }));
        assert_eq!(bc.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_block_still_prunes_pool() {
        let mut bc = build_chain(1).await;
        bc.transaction_pool_mut().add_transaction(tx("X", 1.0));
        let block = Block::new_at(vec![tx("X", 1.0)], "elsewhere".to_string(), 1, 2);
        assert!(bc.add_block(block).is_err());
        assert!(bc.transaction_pool().is_empty());
    }

    #[tokio::test]
    async fn test_start_mining_links_to_tip() {
        let bc = build_chain(2).await;
        let tip = bc.latest_block().unwrap();
        let block = mine_next(&bc).await;
        assert_eq!(block.depth, tip.depth + 1);
        assert_eq!(block.previous_hash, tip.hash);
        assert!(block.valid);
        assert!(block.is_valid());
        assert_eq!(block.difficulty, bc.difficulty());
    }

    #[tokio::test]
    async fn test_start_mining_on_empty_chain_builds_genesis() {
        let bc = Blockchain::with_difficulty(1);
        let block = mine_next(&bc).await;
        assert_eq!(block.depth, 0);
        assert!(block.previous_hash.is_empty());
    }

    #[tokio::test]
    async fn test_start_mining_uses_pool_snapshot() {
        let mut bc = Blockchain::with_difficulty(1);
        bc.transaction_pool_mut().add_transaction(tx("A", 1.0));
        let status = MiningStatus::new();
        let job = bc.start_mining(&status);
        bc.transaction_pool_mut().add_transaction(tx("B", 2.0));
        let block = job.await.unwrap();
        let ids: Vec<&str> = block.transaction_ids().collect();
        assert_eq!(ids, vec!["A"]);
        assert!(!status.is_mining());
    }

    #[tokio::test]
    async fn test_start_mining_returns_none_when_cancelled() {
        let mut bc = Blockchain::with_difficulty(6);
        bc.transaction_pool_mut().add_transaction(tx("A", 1.0));
        let status = MiningStatus::new();
        let worker = tokio::spawn(bc.start_mining(&status));
        tokio::task::yield_now().await;
        status.stop();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), worker)
            .await
            .expect("cancelled mining kept running")
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_chain_built_by_add_block_is_valid() {
        let mut bc = build_chain(3).await;
        assert!(bc.is_valid());
        bc.chain[1].transactions[0].amount = 1_000_000.0;
        assert!(!bc.is_valid());
    }

    #[tokio::test]
    async fn test_broken_link_is_invalid() {
        let mut bc = build_chain(3).await;
        bc.chain[2].previous_hash = "0".repeat(64);
        bc.chain[2].hash = bc.chain[2].calculate_hash();
        assert!(!bc.is_valid());
    }

    #[test]
    fn test_short_chains_are_valid() {
        assert!(Blockchain::new().is_valid());
        let mut bc = Blockchain::new();
        let mut genesis = Block::new_at(vec![], String::new(), 0, 1);
        genesis.hash = "tampered".to_string();
        bc.add_block(genesis).unwrap();
        assert!(bc.is_valid());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let mut bc = build_chain(2).await;
        bc.transaction_pool_mut().add_transaction(tx("pending", 7.25));
        let json = serde_json::to_string(&bc).unwrap();
        let restored: Blockchain = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, bc);
        assert!(restored.is_valid());
        assert_eq!(restored.transaction_pool().len(), 1);
        assert_eq!(restored.difficulty(), bc.difficulty());
    }

    #[test]
    fn test_snapshot_rejects_missing_fields() {
        let json = r#"{"chain": [], "difficulty": 3}"#;
        assert!(serde_json::from_str::<Blockchain>(json).is_err());
    }
}
