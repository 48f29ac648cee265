use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::block::{has_leading_zeros, Block};

/// Shared "keep searching" flag. Every clone observes the same state, so
/// whoever holds one can cancel a mining loop running elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MiningStatus {
    mining: Arc<AtomicBool>,
}

impl MiningStatus {
    pub fn new() -> MiningStatus {
        MiningStatus::default()
    }

    pub fn start(&self) {
        self.mining.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.mining.store(false, Ordering::SeqCst);
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }
}

/// Nonce search. Yields to the scheduler after every attempt and gives up
/// as soon as `status` is cleared, leaving the block with `valid == false`.
pub async fn mine(block: &mut Block, difficulty: usize, status: &MiningStatus) -> bool {
    block.difficulty = difficulty;
    let prefix = block.hash_prefix();

    while status.is_mining() && !has_leading_zeros(&block.hash, difficulty) {
        block.nonce += 1;
        block.hash = Block::hash_with_nonce(&prefix, block.nonce);
        tokio::task::yield_now().await;
    }

    if has_leading_zeros(&block.hash, difficulty) {
        info!("Block {} mined.", block.hash);
        block.valid = true;
    } else {
        debug!("mining of block at depth {} abandoned after {} attempts", block.depth, block.nonce);
    }
    block.valid
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transaction::Transaction;

    fn candidate() -> Block {
        Block::new_at(
            vec![Transaction::new("a", "alice", "bob", 1.0)],
            String::new(),
            0,
            1_700_000_000_000,
        )
    }

    #[tokio::test]
    async fn test_mined_block_is_valid() {
        let status = MiningStatus::new();
        status.start();
        let mut block = candidate();
        assert!(mine(&mut block, 2, &status).await);
        assert!(block.valid);
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.calculate_hash());
        assert!(block.is_valid());
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let status = MiningStatus::new();
        status.start();
        let mut first = candidate();
        let mut second = candidate();
        mine(&mut first, 2, &status).await;
        mine(&mut second, 2, &status).await;
        assert_eq!(first.nonce, second.nonce);
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn test_cleared_status_abandons_block() {
        let status = MiningStatus::new();
        let mut block = candidate();
        // never started, so the loop must not run at all
        assert!(!mine(&mut block, 6, &status).await);
        assert!(!block.valid);
        assert_eq!(block.nonce, 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_running_search() {
        let status = MiningStatus::new();
        status.start();
        let worker = {
            let status = status.clone();
            tokio::spawn(async move {
                let mut block = candidate();
                let mined = mine(&mut block, 6, &status).await;
                (mined, block)
            })
        };
        tokio::task::yield_now().await;
        status.stop();
        let (mined, block) = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("mining did not observe the stop")
            .unwrap();
        assert!(!mined);
        assert!(!block.valid);
    }
}
