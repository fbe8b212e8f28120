use chrono::Utc;
use log::{debug, trace};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::Address;
use super::hash::keccak_hash;
use super::state::State;
use super::transaction::{Transaction, TransactionError};
use super::trie::Trie;
use crate::config::{
    GENESIS_BENEFICIARY, GENESIS_DIFFICULTY, GENESIS_PARENT_HASH, GENESIS_STATE_ROOT,
    GENESIS_TIMESTAMP, GENESIS_TRANSACTIONS_ROOT, HASH_LENGTH, MINE_RATE,
};

/// Errors that can occur while validating a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("The parent hash must be a hash of the last block's headers")]
    ParentHashMismatch,

    #[error("The block must increment the number by 1: expected {expected}, got {got}")]
    InvalidNumber { expected: u64, got: u64 },

    #[error("The difficulty must only adjust by 1: parent {parent}, block {block}")]
    DifficultyJump { parent: u64, block: u64 },

    #[error("The rebuilt transactions root does not match the block's transactions root: {0}")]
    TransactionsRootMismatch(String),

    #[error("The block does not meet the proof of work requirement")]
    ProofOfWork,

    #[error("Block {0} has no parent block to be validated against")]
    MissingParent(u64),

    #[error("Invalid transaction series: {0}")]
    Transaction(#[from] TransactionError),
}

/// Header of a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaders {
    /// Hash of the parent block's headers
    pub parent_hash: String,

    /// Address credited with the mining reward
    #[schema(value_type = String)]
    pub beneficiary: Address,

    /// Difficulty the block was mined at
    pub difficulty: u64,

    /// Height of the block, genesis is 0
    pub number: u64,

    /// Unix time in milliseconds
    pub timestamp: i64,

    /// Proof of work nonce
    pub nonce: u64,

    /// Root hash of the trie built from the transaction series
    pub transactions_root: String,

    /// State root at the time the block was mined
    pub state_root: String,
}

/// The headers minus the nonce; this is what the proof of work commits to
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TruncatedBlockHeaders<'a> {
    parent_hash: &'a str,
    beneficiary: &'a Address,
    difficulty: u64,
    number: u64,
    timestamp: i64,
    transactions_root: &'a str,
    state_root: &'a str,
}

impl BlockHeaders {
    fn truncated(&self) -> TruncatedBlockHeaders<'_> {
        TruncatedBlockHeaders {
            parent_hash: &self.parent_hash,
            beneficiary: &self.beneficiary,
            difficulty: self.difficulty,
            number: self.number,
            timestamp: self.timestamp,
            transactions_root: &self.transactions_root,
            state_root: &self.state_root,
        }
    }

    /// Hash of the truncated headers combined with the nonce
    ///
    /// A block is mined once this hash is at or below its parent's target.
    pub fn proof_of_work_hash(&self) -> String {
        Self::hash_with_nonce(&keccak_hash(&self.truncated()), self.nonce)
    }

    fn hash_with_nonce(header: &str, nonce: u64) -> String {
        keccak_hash(&format!("{}{}", header, nonce))
    }
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub block_headers: BlockHeaders,

    /// Transactions of the block, the mining reward last
    #[schema(value_type = Vec<Object>)]
    pub transaction_series: Vec<Transaction>,
}

impl Block {
    /// The fixed first block every node starts from
    pub fn genesis() -> Self {
        Block {
            block_headers: BlockHeaders {
                parent_hash: GENESIS_PARENT_HASH.to_string(),
                beneficiary: Address::from(GENESIS_BENEFICIARY),
                difficulty: GENESIS_DIFFICULTY,
                number: 0,
                timestamp: GENESIS_TIMESTAMP,
                nonce: 0,
                transactions_root: GENESIS_TRANSACTIONS_ROOT.to_string(),
                state_root: GENESIS_STATE_ROOT.to_string(),
            },
            transaction_series: Vec::new(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Hash of this block's headers, referenced as `parentHash` by its child
    pub fn hash(&self) -> String {
        keccak_hash(&self.block_headers)
    }

    /// Calculates the proof of work target for a child of `last_block`
    ///
    /// # Returns
    ///
    /// The maximum hash divided by the parent's difficulty, as a zero-padded
    /// hex string of `HASH_LENGTH` characters
    pub fn calculate_block_target_hash(last_block: &Block) -> String {
        let difficulty = last_block.block_headers.difficulty;
        if difficulty == 0 {
            return "f".repeat(HASH_LENGTH);
        }

        let target = U256::MAX / U256::from(difficulty);
        let mut bytes = [0u8; HASH_LENGTH / 2];
        target.to_big_endian(&mut bytes);

        hex::encode(bytes)
    }

    /// Difficulty for a block mined at `timestamp` on top of `last_block`
    ///
    /// Drops by one when the parent is older than `MINE_RATE`, rises by one
    /// otherwise, and never goes below 1.
    pub fn adjust_difficulty(last_block: &Block, timestamp: i64) -> u64 {
        let difficulty = last_block.block_headers.difficulty;

        if timestamp.saturating_sub(last_block.block_headers.timestamp) > MINE_RATE {
            return difficulty.saturating_sub(1).max(1);
        }

        difficulty.saturating_add(1)
    }

    /// Mines a new block on top of `last_block`
    ///
    /// # Arguments
    ///
    /// * `last_block` - The current head of the chain
    /// * `beneficiary` - The address that receives the mining reward
    /// * `transaction_series` - The transactions to include, the reward is appended
    /// * `state_root` - The state root to record in the header
    ///
    /// # Returns
    ///
    /// A block whose proof of work hash is at or below the parent's target
    pub fn mine_block(
        last_block: &Block,
        beneficiary: &Address,
        mut transaction_series: Vec<Transaction>,
        state_root: &str,
    ) -> Self {
        let target = Self::calculate_block_target_hash(last_block);

        transaction_series.push(Transaction::mining_reward(beneficiary.clone()));
        let transactions_trie = Trie::build_trie(&transaction_series);

        let parent_hash = last_block.hash();
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;

            let timestamp = Utc::now().timestamp_millis();
            let mut block_headers = BlockHeaders {
                parent_hash: parent_hash.clone(),
                beneficiary: beneficiary.clone(),
                difficulty: Self::adjust_difficulty(last_block, timestamp),
                number: last_block.block_headers.number.saturating_add(1),
                timestamp,
                nonce: 0,
                transactions_root: transactions_trie.root_hash().to_string(),
                state_root: state_root.to_string(),
            };

            let header = keccak_hash(&block_headers.truncated());
            let nonce = rand::random::<u64>();
            let under_target_hash = BlockHeaders::hash_with_nonce(&header, nonce);

            if under_target_hash <= target {
                block_headers.nonce = nonce;
                debug!(
                    "Mined block {} at difficulty {} after {} attempts",
                    block_headers.number, block_headers.difficulty, attempts
                );

                return Block {
                    block_headers,
                    transaction_series,
                };
            }

            trace!("Attempt {} missed the target", attempts);
        }
    }

    /// Validates `block` as the child of `last_block`
    ///
    /// The genesis block always validates. Checks the header linkage,
    /// the transactions root, the proof of work and finally the transaction
    /// series against `state`. Nothing is mutated.
    pub fn validate_block(
        last_block: Option<&Block>,
        block: &Block,
        state: &State,
    ) -> Result<(), BlockError> {
        if block.is_genesis() {
            return Ok(());
        }

        let last_block =
            last_block.ok_or(BlockError::MissingParent(block.block_headers.number))?;
        let headers = &block.block_headers;

        if last_block.hash() != headers.parent_hash {
            return Err(BlockError::ParentHashMismatch);
        }

        let expected_number = last_block.block_headers.number.saturating_add(1);
        if headers.number != expected_number {
            return Err(BlockError::InvalidNumber {
                expected: expected_number,
                got: headers.number,
            });
        }

        if last_block.block_headers.difficulty.abs_diff(headers.difficulty) > 1 {
            return Err(BlockError::DifficultyJump {
                parent: last_block.block_headers.difficulty,
                block: headers.difficulty,
            });
        }

        let rebuilt_transactions_trie = Trie::build_trie(&block.transaction_series);
        if rebuilt_transactions_trie.root_hash() != headers.transactions_root {
            return Err(BlockError::TransactionsRootMismatch(
                headers.transactions_root.clone(),
            ));
        }

        let target = Self::calculate_block_target_hash(last_block);
        if headers.proof_of_work_hash() > target {
            return Err(BlockError::ProofOfWork);
        }

        Transaction::validate_transaction_series(&block.transaction_series, state)?;

        Ok(())
    }

    /// Applies every transaction of the block to `state`, in order
    pub fn run_block(block: &Block, state: &mut State) {
        for transaction in &block.transaction_series {
            Transaction::run_transaction(transaction, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::account::Account;
    use crate::blockchain::interpreter::{OpCode, Value};
    use crate::config::MINING_REWARD;

    fn setup() -> (Account, State) {
        let account = Account::new();
        let mut state = State::new();
        state.put_account(account.address(), account.to_data());
        (account, state)
    }

    fn mine_empty(parent: &Block, account: &Account, state: &State) -> Block {
        Block::mine_block(parent, account.address(), Vec::new(), state.get_state_root())
    }

    /// A recent parent with a difficulty high enough that a random nonce
    /// usually misses its target
    fn hard_parent() -> Block {
        let mut parent = Block::genesis();
        parent.block_headers.difficulty = 16;
        parent.block_headers.timestamp = Utc::now().timestamp_millis();
        parent
    }

    #[test]
    fn test_genesis() {
        let genesis = Block::genesis();

        assert!(genesis.is_genesis());
        assert_eq!(genesis.block_headers.number, 0);
        assert_eq!(genesis.block_headers.parent_hash, GENESIS_PARENT_HASH);
        assert!(genesis.transaction_series.is_empty());
        Block::validate_block(None, &genesis, &State::new()).unwrap();
    }

    #[test]
    fn test_calculate_block_target_hash() {
        let mut block = Block::genesis();

        block.block_headers.difficulty = 1;
        assert_eq!(Block::calculate_block_target_hash(&block), "f".repeat(64));

        block.block_headers.difficulty = 0;
        assert_eq!(Block::calculate_block_target_hash(&block), "f".repeat(64));

        block.block_headers.difficulty = 16;
        let target = Block::calculate_block_target_hash(&block);
        assert_eq!(target.len(), 64);
        assert_eq!(target, format!("0{}", "f".repeat(63)));

        block.block_headers.difficulty = 500;
        assert!(Block::calculate_block_target_hash(&block).starts_with("00"));
    }

    #[test]
    fn test_adjust_difficulty() {
        let mut block = Block::genesis();
        block.block_headers.difficulty = 5;
        let timestamp = block.block_headers.timestamp;

        assert_eq!(Block::adjust_difficulty(&block, timestamp + MINE_RATE + 1), 4);
        assert_eq!(Block::adjust_difficulty(&block, timestamp + MINE_RATE), 6);
        assert_eq!(Block::adjust_difficulty(&block, timestamp + 1), 6);

        block.block_headers.difficulty = 1;
        assert_eq!(Block::adjust_difficulty(&block, timestamp + MINE_RATE + 1), 1);

        block.block_headers.difficulty = 0;
        assert_eq!(Block::adjust_difficulty(&block, timestamp + MINE_RATE + 1), 1);
    }

    #[test]
    fn test_adjust_difficulty_at_extremes() {
        let mut block = Block::genesis();
        block.block_headers.difficulty = 5;

        block.block_headers.timestamp = i64::MIN;
        assert_eq!(Block::adjust_difficulty(&block, i64::MAX), 4);

        block.block_headers.timestamp = i64::MAX;
        assert_eq!(Block::adjust_difficulty(&block, i64::MIN), 6);

        block.block_headers.difficulty = u64::MAX;
        assert_eq!(Block::adjust_difficulty(&block, i64::MIN), u64::MAX);
    }

    #[test]
    fn test_mine_block() {
        let (account, state) = setup();
        let last_block = Block::genesis();

        let block = mine_empty(&last_block, &account, &state);
        let headers = &block.block_headers;

        assert_eq!(headers.number, 1);
        assert_eq!(headers.parent_hash, last_block.hash());
        assert_eq!(headers.beneficiary, *account.address());
        assert_eq!(headers.state_root, state.get_state_root());
        assert!(headers.proof_of_work_hash() <= Block::calculate_block_target_hash(&last_block));

        assert_eq!(block.transaction_series.len(), 1);
        assert_eq!(
            headers.transactions_root,
            Trie::build_trie(&block.transaction_series).root_hash()
        );
    }

    #[test]
    fn test_mined_block_meets_hard_target() {
        let (account, state) = setup();
        let parent = hard_parent();

        let block = mine_empty(&parent, &account, &state);

        assert_eq!(block.block_headers.difficulty, 17);
        assert!(block.block_headers.proof_of_work_hash().starts_with('0'));
        Block::validate_block(Some(&parent), &block, &state).unwrap();
    }

    #[test]
    fn test_validate_mined_block() {
        let (account, state) = setup();
        let genesis = Block::genesis();

        let first = mine_empty(&genesis, &account, &state);
        Block::validate_block(Some(&genesis), &first, &state).unwrap();

        let second = mine_empty(&first, &account, &state);
        Block::validate_block(Some(&first), &second, &state).unwrap();
    }

    #[test]
    fn test_rejects_block_without_parent() {
        let (account, state) = setup();
        let block = mine_empty(&Block::genesis(), &account, &state);

        assert!(matches!(
            Block::validate_block(None, &block, &state),
            Err(BlockError::MissingParent(1))
        ));
    }

    #[test]
    fn test_rejects_tampered_headers() {
        let (account, state) = setup();
        let parent = hard_parent();
        let block = mine_empty(&parent, &account, &state);

        let mut tampered = block.clone();
        tampered.block_headers.parent_hash = "foo".to_string();
        assert!(matches!(
            Block::validate_block(Some(&parent), &tampered, &state),
            Err(BlockError::ParentHashMismatch)
        ));

        let mut tampered = block.clone();
        tampered.block_headers.number = 500;
        assert!(matches!(
            Block::validate_block(Some(&parent), &tampered, &state),
            Err(BlockError::InvalidNumber { expected: 1, got: 500 })
        ));

        let mut tampered = block.clone();
        tampered.block_headers.difficulty += 10;
        let err = Block::validate_block(Some(&parent), &tampered, &state).unwrap_err();
        assert!(matches!(err, BlockError::DifficultyJump { .. }));
        assert!(err.to_string().contains("only adjust by 1"));

        let mut tampered = block.clone();
        tampered.block_headers.transactions_root = "foo".to_string();
        assert!(matches!(
            Block::validate_block(Some(&parent), &tampered, &state),
            Err(BlockError::TransactionsRootMismatch(_))
        ));
    }

    #[test]
    fn test_rejects_tampered_nonce() {
        let (account, state) = setup();
        let parent = hard_parent();
        let target = Block::calculate_block_target_hash(&parent);
        let mut block = mine_empty(&parent, &account, &state);

        while block.block_headers.proof_of_work_hash() <= target {
            block.block_headers.nonce = block.block_headers.nonce.wrapping_add(1);
        }

        let err = Block::validate_block(Some(&parent), &block, &state).unwrap_err();
        assert!(matches!(err, BlockError::ProofOfWork));
        assert!(err.to_string().contains("proof of work"));
    }

    #[test]
    fn test_rejects_invalid_transaction_series() {
        let (account, state) = setup();
        let genesis = Block::genesis();
        let overdraft = Transaction::transact(&account, account.address().clone(), 9001.0, 0);

        let block = Block::mine_block(
            &genesis,
            account.address(),
            vec![overdraft],
            state.get_state_root(),
        );

        assert!(matches!(
            Block::validate_block(Some(&genesis), &block, &state),
            Err(BlockError::Transaction(TransactionError::InsufficientBalance { .. }))
        ));
    }

    #[test]
    fn test_run_block() {
        let (account, mut state) = setup();
        let to_account = Account::new();
        state.put_account(to_account.address(), to_account.to_data());

        let transfer = Transaction::transact(&account, to_account.address().clone(), 20.0, 0);
        let block = Block::mine_block(
            &Block::genesis(),
            account.address(),
            vec![transfer],
            state.get_state_root(),
        );
        let root_before = state.get_state_root().to_string();

        Block::run_block(&block, &mut state);

        assert_ne!(state.get_state_root(), root_before);
        assert_eq!(
            Account::calculate_balance(account.address(), &state).unwrap(),
            account.balance - 20.0 + MINING_REWARD
        );
        assert_eq!(
            Account::calculate_balance(to_account.address(), &state).unwrap(),
            to_account.balance + 20.0
        );
    }

    #[test]
    fn test_run_block_charges_full_gas_when_execution_fails() {
        let (account, mut state) = setup();

        // Copies "k" to "seen", then jumps out of range once "k" is 1, else sets "k" to 1
        let text = |word: &str| Value::Text(word.to_string());
        let contract = Account::with_code(vec![
            OpCode::Push.into(),
            Value::Number(99.0),
            OpCode::Push.into(),
            text("k"),
            OpCode::Load.into(),
            OpCode::Push.into(),
            text("seen"),
            OpCode::Store.into(),
            OpCode::Push.into(),
            text("k"),
            OpCode::Load.into(),
            OpCode::Jumpi.into(),
            OpCode::Push.into(),
            Value::Number(1.0),
            OpCode::Push.into(),
            text("k"),
            OpCode::Store.into(),
            OpCode::Stop.into(),
        ]);
        let contract_key = contract.state_key();
        state.put_account(&contract_key, contract.to_data());

        let first = Transaction::transact(&account, contract_key.clone(), 0.0, 30);
        let second = Transaction::transact(&account, contract_key.clone(), 0.0, 30);

        let genesis = Block::genesis();
        let block = Block::mine_block(
            &genesis,
            account.address(),
            vec![first.clone(), second],
            state.get_state_root(),
        );
        Block::validate_block(Some(&genesis), &block, &state).unwrap();

        let mut reference = state.clone();
        Transaction::run_transaction(&first, &mut reference);

        Block::run_block(&block, &mut state);

        // 22 gas for the successful run, the whole limit of 30 for the failed one
        assert_eq!(
            Account::calculate_balance(account.address(), &state).unwrap(),
            account.balance - 22.0 - 30.0 + MINING_REWARD
        );
        assert_eq!(
            Account::calculate_balance(&contract_key, &state).unwrap(),
            contract.balance + 52.0
        );

        let storage = state.storage_trie(&contract_key).unwrap();
        assert_eq!(storage.get("seen"), Some(Value::Null));
        assert_eq!(storage.get("k"), Some(Value::Number(1.0)));
        assert_eq!(
            storage.root_hash(),
            reference.storage_trie(&contract_key).unwrap().root_hash()
        );
    }

    #[test]
    fn test_block_encoding() {
        let (account, state) = setup();
        let block = mine_empty(&Block::genesis(), &account, &state);

        let encoded = serde_json::to_value(&block).unwrap();
        assert!(encoded["blockHeaders"]["parentHash"].is_string());
        assert_eq!(encoded["transactionSeries"][0]["type"], "MINING_REWARD");

        let decoded: Block = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, block);
        Block::validate_block(Some(&Block::genesis()), &decoded, &state).unwrap();
    }
}
