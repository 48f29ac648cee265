use std::collections::HashSet;

use log::debug;

use crate::transaction::Transaction;

/// Unconfirmed transactions in arrival order.
///
/// Ids are not deduplicated: the same id can sit in the pool twice and both
/// copies leave together when a block carrying that id is committed.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TransactionPool {
    transactions: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> TransactionPool {
        TransactionPool::default()
    }

    pub fn add_transaction(&mut self, transaction: Transaction) {
        debug!("pool: add transaction {}", transaction.id);
        self.transactions.push(transaction);
    }

    /// Copy of the current contents. Later additions do not show up in it.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn remove_transactions_by_id<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: HashSet<&str> = ids.into_iter().collect();
        let before = self.transactions.len();
        self.transactions.retain(|tx| !ids.contains(tx.id.as_str()));
        debug!("pool: removed {} transactions", before - self.transactions.len());
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
