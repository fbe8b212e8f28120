use log::{info, warn};
use thiserror::Error;

use super::block::{Block, BlockError};
use super::queue::TransactionQueue;
use super::state::State;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Invalid block {number}: {source}")]
    InvalidBlock { number: u64, source: BlockError },

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("The incoming chain must be at least as long as the local chain: local {local}, incoming {incoming}")]
    ChainTooShort { local: usize, incoming: usize },
}

/// Represents the blockchain
///
/// Owns the chain of blocks and the world state that results from running
/// them. Callers serialize access; nothing in here is internally locked.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    chain: Vec<Block>,

    /// State after running every block of the chain
    state: State,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    pub fn new() -> Self {
        Self::with_state(State::new())
    }

    /// Creates a new blockchain on top of an existing state
    ///
    /// # Arguments
    ///
    /// * `state` - The world state new blocks are validated against and applied to
    pub fn with_state(state: State) -> Self {
        Blockchain {
            chain: vec![Block::genesis()],
            state,
        }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Gets the last block in the chain
    pub fn get_last_block(&self) -> &Block {
        // The chain is never empty: it starts at genesis and is only ever
        // swapped for a candidate that also starts at genesis
        &self.chain[self.chain.len() - 1]
    }

    /// Validates `block` against the head and, on success, appends and runs it
    ///
    /// # Arguments
    ///
    /// * `block` - The candidate block
    /// * `transaction_queue` - The pool the block's transactions are removed from
    ///
    /// # Returns
    ///
    /// An error describing the rejected check; chain, state and queue are
    /// then left untouched
    pub fn add_block(
        &mut self,
        block: Block,
        transaction_queue: &TransactionQueue,
    ) -> Result<(), BlockchainError> {
        let number = block.block_headers.number;

        Block::validate_block(Some(self.get_last_block()), &block, &self.state).map_err(
            |source| {
                warn!("Rejected block {}: {}", number, source);
                BlockchainError::InvalidBlock { number, source }
            },
        )?;

        Block::run_block(&block, &mut self.state);
        transaction_queue.clear_block_transactions(&block.transaction_series);
        self.chain.push(block);

        info!("Added block {} to the chain", number);
        Ok(())
    }

    /// Replaces the local chain with a peer's chain
    ///
    /// Every candidate block is validated against its predecessor in the
    /// candidate and run into a scratch state seeded from genesis. The chain
    /// and state are swapped only once every block has passed, so a failure
    /// leaves the local chain and state exactly as they were.
    pub fn replace_chain(&mut self, chain: Vec<Block>) -> Result<(), BlockchainError> {
        let Some(first) = chain.first() else {
            return Err(BlockchainError::InvalidChain(
                "The incoming chain is empty".to_string(),
            ));
        };

        if !first.is_genesis() {
            return Err(BlockchainError::InvalidChain(
                "The incoming chain must start with the genesis block".to_string(),
            ));
        }

        if chain.len() < self.chain.len() {
            return Err(BlockchainError::ChainTooShort {
                local: self.chain.len(),
                incoming: chain.len(),
            });
        }

        let mut state = State::new();

        for (index, block) in chain.iter().enumerate() {
            let number = block.block_headers.number;
            let last_block = index.checked_sub(1).map(|parent| &chain[parent]);

            Block::validate_block(last_block, block, &state)
                .map_err(|source| BlockchainError::InvalidBlock { number, source })?;
            Block::run_block(block, &mut state);

            info!("*-- Validated block number: {}", number);
        }

        self.chain = chain;
        self.state = state;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::account::Account;
    use crate::blockchain::transaction::Transaction;
    use crate::config::{MINING_REWARD, STARTING_BALANCE};

    fn mine_onto(blockchain: &mut Blockchain, miner: &Account, queue: &TransactionQueue) -> Block {
        let block = Block::mine_block(
            blockchain.get_last_block(),
            miner.address(),
            queue.get_transaction_series(),
            blockchain.state().get_state_root(),
        );

        blockchain.add_block(block.clone(), queue).unwrap();
        block
    }

    /// A chain of three mined blocks: two accounts created, then a transfer
    fn populated_chain() -> (Blockchain, Account, Account) {
        let mut blockchain = Blockchain::new();
        let queue = TransactionQueue::new();
        let account = Account::new();
        let to_account = Account::new();

        queue.add(Transaction::create_account(&account));
        queue.add(Transaction::create_account(&to_account));
        mine_onto(&mut blockchain, &account, &queue);

        queue.add(Transaction::transact(&account, to_account.address().clone(), 50.0, 0));
        mine_onto(&mut blockchain, &account, &queue);

        mine_onto(&mut blockchain, &account, &queue);

        (blockchain, account, to_account)
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = Blockchain::new();

        assert_eq!(blockchain.chain().len(), 1);
        assert!(blockchain.get_last_block().is_genesis());
    }

    #[test]
    fn test_add_block() {
        let mut blockchain = Blockchain::new();
        let queue = TransactionQueue::new();
        let account = Account::new();
        queue.add(Transaction::create_account(&account));

        let block = mine_onto(&mut blockchain, &account, &queue);

        assert_eq!(blockchain.chain().len(), 2);
        assert_eq!(*blockchain.get_last_block(), block);
        assert!(queue.is_empty());
        assert_eq!(
            Account::calculate_balance(account.address(), blockchain.state()).unwrap(),
            STARTING_BALANCE + MINING_REWARD
        );
    }

    #[test]
    fn test_add_block_rejects_invalid_block() {
        let mut blockchain = Blockchain::new();
        let queue = TransactionQueue::new();
        let account = Account::new();
        queue.add(Transaction::create_account(&account));

        let mut block = Block::mine_block(
            blockchain.get_last_block(),
            account.address(),
            queue.get_transaction_series(),
            blockchain.state().get_state_root(),
        );
        block.block_headers.number = 7;
        let root_before = blockchain.state().get_state_root().to_string();

        let err = blockchain.add_block(block, &queue).unwrap_err();

        assert!(matches!(
            err,
            BlockchainError::InvalidBlock {
                number: 7,
                source: BlockError::InvalidNumber { .. }
            }
        ));
        assert_eq!(blockchain.chain().len(), 1);
        assert_eq!(blockchain.state().get_state_root(), root_before);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_replace_chain_with_genesis_only() {
        let mut blockchain = Blockchain::new();

        blockchain.replace_chain(vec![Block::genesis()]).unwrap();
        assert_eq!(blockchain.chain().len(), 1);
    }

    #[test]
    fn test_replace_chain_adopts_valid_chain() {
        let (source, account, to_account) = populated_chain();
        let mut blockchain = Blockchain::new();

        blockchain.replace_chain(source.chain().to_vec()).unwrap();

        assert_eq!(blockchain.chain(), source.chain());
        assert_eq!(blockchain.state().get_state_root(), source.state().get_state_root());
        assert_eq!(
            Account::calculate_balance(account.address(), blockchain.state()).unwrap(),
            STARTING_BALANCE - 50.0 + 3.0 * MINING_REWARD
        );
        assert_eq!(
            Account::calculate_balance(to_account.address(), blockchain.state()).unwrap(),
            STARTING_BALANCE + 50.0
        );
    }

    #[test]
    fn test_replace_chain_rejects_tampered_block() {
        let (source, _, _) = populated_chain();
        let mut blockchain = Blockchain::new();
        let miner = Account::new();
        let queue = TransactionQueue::new();
        queue.add(Transaction::create_account(&miner));
        mine_onto(&mut blockchain, &miner, &queue);

        let chain_before = blockchain.chain().to_vec();
        let root_before = blockchain.state().get_state_root().to_string();

        let mut candidate = source.chain().to_vec();
        candidate[2].block_headers.number = 99;

        let err = blockchain.replace_chain(candidate).unwrap_err();

        assert!(matches!(err, BlockchainError::InvalidBlock { number: 99, .. }));
        assert_eq!(blockchain.chain(), chain_before.as_slice());
        assert_eq!(blockchain.state().get_state_root(), root_before);
        assert_eq!(
            Account::calculate_balance(miner.address(), blockchain.state()).unwrap(),
            STARTING_BALANCE + MINING_REWARD
        );
    }

    #[test]
    fn test_replace_chain_rejects_bad_shapes() {
        let (mut blockchain, _, _) = populated_chain();

        assert!(matches!(
            blockchain.replace_chain(Vec::new()),
            Err(BlockchainError::InvalidChain(_))
        ));

        let mut fake_genesis = Block::genesis();
        fake_genesis.block_headers.difficulty = 3;
        assert!(matches!(
            blockchain.replace_chain(vec![fake_genesis]),
            Err(BlockchainError::InvalidChain(_))
        ));

        assert!(matches!(
            blockchain.replace_chain(vec![Block::genesis()]),
            Err(BlockchainError::ChainTooShort { local: 4, incoming: 1 })
        ));
        assert_eq!(blockchain.chain().len(), 4);
    }
}
