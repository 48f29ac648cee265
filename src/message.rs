use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::constants::{MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::error::ChainError;
use crate::transaction::Transaction;

/// Empty reply closing a transaction or block push.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Ack;

/// Asks a peer for its whole chain, pool and difficulty.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ChainRequest;

/// Checks applied to a decoded peer payload before it reaches the ledger.
/// The codec already enforces field presence and types, this covers the
/// values themselves.
pub trait Payload {
    fn check(&self) -> Result<(), ChainError>;
}

impl Payload for Transaction {
    fn check(&self) -> Result<(), ChainError> {
        if self.id.is_empty() {
            return Err(ChainError::malformed("transaction without id"));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(ChainError::malformed(format!(
                "transaction {} has amount {}",
                self.id, self.amount
            )));
        }
        Ok(())
    }
}

impl Payload for Block {
    fn check(&self) -> Result<(), ChainError> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(ChainError::malformed(format!(
                "block {} has difficulty {}",
                self.depth, self.difficulty
            )));
        }
        // no successor could be built on top of it
        if self.depth == u64::MAX {
            return Err(ChainError::malformed("block depth out of range"));
        }
        if self.hash.len() != 64 || !self.hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ChainError::malformed(format!("block {} hash is not a sha256 digest", self.depth)));
        }
        if !self.mining_duration.is_finite() || self.mining_duration < 0.0 {
            return Err(ChainError::malformed(format!("block {} has a bad mining duration", self.depth)));
        }
        self.transactions.iter().try_for_each(|item| item.check())
    }
}

impl Payload for Blockchain {
    fn check(&self) -> Result<(), ChainError> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty()) {
            return Err(ChainError::malformed(format!("snapshot has difficulty {}", self.difficulty())));
        }
        self.chain().iter().try_for_each(|item| item.check())?;
        self.transaction_pool().transactions().iter().try_for_each(|item| item.check())
    }
}
