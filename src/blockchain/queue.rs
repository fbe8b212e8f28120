use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::debug;

use super::transaction::Transaction;

/// Pool of transactions waiting to be mined
///
/// Keyed by transaction id, so re-adding a transaction overwrites it. Every
/// method takes `&self`; the pool can be shared between request handlers.
#[derive(Debug, Default)]
pub struct TransactionQueue {
    transaction_map: DashMap<String, (u64, Transaction)>,
    sequence: AtomicU64,
}

impl TransactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transaction to the pool, replacing any with the same id
    pub fn add(&self, transaction: Transaction) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!("Queued transaction {}", transaction.id);

        self.transaction_map
            .insert(transaction.id.clone(), (sequence, transaction));
    }

    /// All queued transactions in the order they were added
    pub fn get_transaction_series(&self) -> Vec<Transaction> {
        let mut entries: Vec<(u64, Transaction)> = self
            .transaction_map
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by_key(|(sequence, _)| *sequence);
        entries.into_iter().map(|(_, transaction)| transaction).collect()
    }

    /// Removes the transactions of an accepted block from the pool
    pub fn clear_block_transactions(&self, transaction_series: &[Transaction]) {
        for transaction in transaction_series {
            self.transaction_map.remove(&transaction.id);
        }
    }

    pub fn len(&self) -> usize {
        self.transaction_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_map.is_empty()
    }
}
