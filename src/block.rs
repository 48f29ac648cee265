use std::fmt;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::constants::DEFAULT_DIFFICULTY;
use crate::transaction::Transaction;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    // height in the chain, genesis is 0
    pub depth: u64,
    // identity of the node that mined it, empty until attributed
    pub miner: String,
    pub nonce: u64,
    pub hash: String,
    // empty for genesis
    pub previous_hash: String,
    // milliseconds since the unix epoch, fixed at construction
    pub timestamp: u64,
    // set only by a successful proof of work
    pub valid: bool,
    // leading '0' hex characters required in the hash
    pub difficulty: usize,
    // seconds spent mining
    pub mining_duration: f64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(transactions: Vec<Transaction>, previous_hash: String, depth: u64) -> Block {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Block::new_at(transactions, previous_hash, depth, timestamp)
    }

    pub fn new_at(transactions: Vec<Transaction>, previous_hash: String, depth: u64, timestamp: u64) -> Block {
        let mut block = Block {
            depth,
            miner: String::new(),
            nonce: 0,
            hash: String::new(),
            previous_hash,
            timestamp,
            valid: false,
            difficulty: DEFAULT_DIFFICULTY,
            mining_duration: 0.0,
            transactions,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Hasher already fed with everything except the nonce. Mining clones it
    /// once per attempt instead of reserializing the transactions.
    pub(crate) fn hash_prefix(&self) -> Sha256 {
        // plain structs of strings and numbers always serialize
        let transactions = serde_json::to_vec(&self.transactions).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.timestamp.to_string().as_bytes());
        hasher.update(&transactions);
        hasher
    }

    pub(crate) fn hash_with_nonce(prefix: &Sha256, nonce: u64) -> String {
        let mut hasher = prefix.clone();
        hasher.update(nonce.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// SHA-256 of previous hash, timestamp, transactions and nonce.
    pub fn calculate_hash(&self) -> String {
        Block::hash_with_nonce(&self.hash_prefix(), self.nonce)
    }

    pub fn meets_difficulty(&self) -> bool {
        has_leading_zeros(&self.hash, self.difficulty)
    }

    /// Stored hash matches the fields and satisfies the stated difficulty.
    pub fn is_valid(&self) -> bool {
        self.difficulty >= 1 && self.hash == self.calculate_hash() && self.meets_difficulty()
    }

    pub fn set_miner(&mut self, miner: impl Into<String>) {
        self.miner = miner.into();
    }

    pub fn set_mining_duration(&mut self, seconds: f64) {
        self.mining_duration = seconds;
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = &str> {
        self.transactions.iter().map(|tx| tx.id.as_str())
    }
}

pub(crate) fn has_leading_zeros(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    Block {{")?;
        writeln!(f, "        depth: {},", self.depth)?;
        writeln!(f, "        miner: {},", self.miner)?;
        writeln!(f, "        nonce: {},", self.nonce)?;
        writeln!(f, "        hash: '{}',", self.hash)?;
        writeln!(f, "        previousHash: '{}',", self.previous_hash)?;
        writeln!(f, "        timestamp: {},", self.timestamp)?;
        writeln!(f, "        valid: {},", self.valid)?;
        writeln!(f, "        difficulty: {},", self.difficulty)?;
        writeln!(f, "        miningDuration: {},", self.mining_duration)?;
        writeln!(f, "        transactions: [")?;
        for tx in &self.transactions {
            writeln!(f, "            {}", tx)?;
        }
        writeln!(f, "        ]")?;
        write!(f, "    }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Block {
        let txs = vec![
            Transaction::new("a", "alice", "bob", 10.0),
            Transaction::new("b", "bob", "carol", 2.5),
        ];
        Block::new_at(txs, "prev".to_string(), 1, 1_700_000_000_000)
    }

    #[test]
    fn test_hash_is_fresh_after_construction() {
        let b = sample();
        assert_eq!(b.hash, b.calculate_hash());
        assert_eq!(b.hash.len(), 64);
        assert!(!b.valid);
    }

    #[test]
    fn test_hash_matches_formula() {
        let b = sample();
        let mut hasher = Sha256::new();
        hasher.update(b"prev");
        hasher.update(b"1700000000000");
        hasher.update(serde_json::to_vec(&b.transactions).unwrap());
        hasher.update(b"0");
        assert_eq!(b.hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_transaction_order_changes_hash() {
        let b = sample();
        let mut swapped = b.clone();
        swapped.transactions.reverse();
        assert_ne!(b.calculate_hash(), swapped.calculate_hash());
    }

    #[test]
    fn test_miner_and_duration_do_not_feed_hash() {
        let b = sample();
        let mut attributed = b.clone();
        attributed.set_miner("node-1");
        attributed.set_mining_duration(12.0);
        assert_eq!(b.calculate_hash(), attributed.calculate_hash());
    }

    #[test]
    fn test_is_valid_requires_difficulty() {
        let mut b = sample();
        b.difficulty = 1;
        while !b.hash.starts_with('0') {
            b.nonce += 1;
            b.hash = b.calculate_hash();
        }
        assert!(b.is_valid());
        b.difficulty = 64;
        assert!(!b.is_valid());
        b.difficulty = 0;
        assert!(!b.is_valid());
    }

    #[test]
    fn test_stale_hash_is_invalid() {
        let mut b = sample();
        b.difficulty = 1;
        while !b.hash.starts_with('0') {
            b.nonce += 1;
            b.hash = b.calculate_hash();
        }
        b.transactions[0].amount = 99.0;
        assert!(!b.is_valid());
    }

    #[test]
    fn test_leading_zeros() {
        assert!(has_leading_zeros("00ab", 2));
        assert!(!has_leading_zeros("0ab", 2));
        assert!(!has_leading_zeros("0", 2));
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("previousHash").is_some());
        assert!(json.get("miningDuration").is_some());
    }
}
