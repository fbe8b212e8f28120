// A single ledger node
//
// Ties the chain, its state, the pending queue and the node's own account
// together behind one lock, so mining and block acceptance never interleave.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use thiserror::Error;

use crate::blockchain::account::AccountError;
use crate::blockchain::chain::BlockchainError;
use crate::blockchain::transaction::TransactionError;
use crate::blockchain::{
    Account, Address, Block, Blockchain, Transaction, TransactionArgs, TransactionKind,
    TransactionQueue, Value,
};

/// Errors that can occur while serving node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("Rejected transaction: {0}")]
    Transaction(#[from] TransactionError),
}

/// What a client asks the node to submit
///
/// Without a recipient the request publishes a new account carrying `code`;
/// with one it becomes a transfer signed by the node's account.
#[derive(Debug, Clone, Default)]
pub struct TransactRequest {
    pub code: Option<Vec<Value>>,
    pub gas_limit: Option<u64>,
    pub to: Option<Address>,
    pub value: Option<f64>,
}

/// Owns the ledger state served by one process
#[derive(Debug)]
pub struct Node {
    blockchain: Mutex<Blockchain>,
    transaction_queue: TransactionQueue,
    account: Account,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    /// Creates a node with a fresh account
    pub fn new() -> Self {
        Self::with_account(Account::new())
    }

    /// Creates a node around `account`
    ///
    /// The account's CREATE_ACCOUNT transaction is queued right away so the
    /// first mined block publishes it.
    pub fn with_account(account: Account) -> Self {
        let transaction_queue = TransactionQueue::new();
        transaction_queue.add(Transaction::create_transaction(
            TransactionArgs::CreateAccount { account: &account },
        ));

        info!("Node account: {}", account.address());

        Node {
            blockchain: Mutex::new(Blockchain::new()),
            transaction_queue,
            account,
        }
    }

    // Poisoning is ignored so a panicking holder does not fail every later call
    fn blockchain(&self) -> MutexGuard<'_, Blockchain> {
        self.blockchain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn transaction_queue(&self) -> &TransactionQueue {
        &self.transaction_queue
    }

    /// Snapshot of the current chain
    pub fn chain(&self) -> Vec<Block> {
        self.blockchain().chain().to_vec()
    }

    /// Mines the queued transactions into a block and adds it to the chain
    ///
    /// Queued transactions that no longer validate against the current state
    /// are dropped first. Blocks the calling thread for the whole proof of
    /// work search.
    pub fn mine(&self) -> Result<Block, NodeError> {
        let mut blockchain = self.blockchain();

        let stale: Vec<Transaction> = self
            .transaction_queue
            .get_transaction_series()
            .into_iter()
            .filter(|transaction| {
                match Transaction::validate_transaction(transaction, blockchain.state()) {
                    Ok(()) => false,
                    Err(err) => {
                        warn!("Dropping queued transaction {}: {}", transaction.id, err);
                        true
                    }
                }
            })
            .collect();
        self.transaction_queue.clear_block_transactions(&stale);

        let block = Block::mine_block(
            blockchain.get_last_block(),
            self.account.address(),
            self.transaction_queue.get_transaction_series(),
            blockchain.state().get_state_root(),
        );

        blockchain.add_block(block.clone(), &self.transaction_queue)?;

        Ok(block)
    }

    /// Builds a transaction from `request`, validates it against the current
    /// state and queues it
    pub fn transact(&self, request: TransactRequest) -> Result<Transaction, NodeError> {
        let transaction = match request.to {
            Some(to) => Transaction::create_transaction(TransactionArgs::Transact {
                account: &self.account,
                to,
                value: request.value.unwrap_or_default(),
                gas_limit: request.gas_limit.unwrap_or_default(),
            }),
            None => {
                let account = Account::with_code(request.code.unwrap_or_default());
                Transaction::create_transaction(TransactionArgs::CreateAccount {
                    account: &account,
                })
            }
        };

        Transaction::validate_transaction(&transaction, self.blockchain().state())?;

        self.transaction_queue.add(transaction.clone());
        Ok(transaction)
    }

    /// Balance of `address`, or of the node's account when absent
    pub fn balance(&self, address: Option<Address>) -> Result<f64, NodeError> {
        let address = address.unwrap_or_else(|| self.account.address().clone());
        let blockchain = self.blockchain();

        Ok(Account::calculate_balance(&address, blockchain.state())?)
    }

    /// Adopts a peer's chain
    ///
    /// Transactions of local blocks that the peer's chain drops go back into
    /// the queue, except mining rewards. Queued transactions the peer's chain
    /// already contains are cleared.
    pub fn replace_chain(&self, chain: Vec<Block>) -> Result<(), NodeError> {
        let mut blockchain = self.blockchain();
        let previous_chain = blockchain.chain().to_vec();

        blockchain.replace_chain(chain)?;

        let adopted: HashSet<&str> = blockchain
            .chain()
            .iter()
            .flat_map(|block| &block.transaction_series)
            .map(|transaction| transaction.id.as_str())
            .collect();

        for block in blockchain.chain() {
            self.transaction_queue
                .clear_block_transactions(&block.transaction_series);
        }

        let mut requeued = 0;
        for transaction in previous_chain
            .into_iter()
            .flat_map(|block| block.transaction_series)
            .filter(|transaction| !adopted.contains(transaction.id.as_str()))
            .filter(|transaction| {
                !matches!(transaction.kind, TransactionKind::MiningReward { .. })
            })
        {
            self.transaction_queue.add(transaction);
            requeued += 1;
        }

        info!(
            "Synchronized blockchain with a peer chain, re-queued {} transactions",
            requeued
        );

        Ok(())
    }
}
