use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

use super::account::{Account, AccountData};
use super::crypto::{Address, DigitalSignature};
use super::interpreter::{ExecutionResult, Interpreter, InterpreterError};
use super::state::State;
use crate::config::MINING_REWARD;

/// Errors that can occur while validating a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction: {0} signature is invalid")]
    InvalidSignature(String),

    #[error("Transaction: {id} carries an invalid value: {value}")]
    InvalidValue { id: String, value: f64 },

    #[error("Transaction value and gasLimit: {required} exceeds account balance: {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("The account: {0} does not exist")]
    NoSuchAccount(String),

    #[error("Transaction needs more gas. Gas Provided: {provided}; Gas Needed: {needed}")]
    InsufficientGas { provided: u64, needed: u64 },

    #[error("The transaction account data has an incorrect number of fields: expected {expected}, got {got}")]
    AccountDataFieldCount { expected: usize, got: usize },

    #[error("The field: {0}, is unexpected for account data")]
    UnexpectedAccountDataField(String),

    #[error("The transaction account data is malformed: {0}")]
    MalformedAccountData(String),

    #[error("The provided mining reward value: {provided} does not equal the official mining reward value of: {expected}")]
    InvalidMiningReward { provided: f64, expected: f64 },

    #[error("Transaction: {id} is not a {expected} transaction")]
    UnexpectedKind { id: String, expected: &'static str },

    #[error("Smart contract execution failed: {0}")]
    Interpreter(#[from] InterpreterError),
}

/// The three kinds of state change a transaction can carry
///
/// Encoded with a `type` tag of `CREATE_ACCOUNT`, `TRANSACT` or `MINING_REWARD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Publishes a new account; the snapshot is kept as a raw object so its
    /// field set can be checked against the account schema
    #[serde(rename_all = "camelCase")]
    CreateAccount { account_data: Map<String, JsonValue> },

    /// Moves value to an account, running its code if it has any
    #[serde(rename_all = "camelCase")]
    Transact {
        from: Address,
        to: Address,
        value: f64,
        gas_limit: u64,
        signature: DigitalSignature,
    },

    /// Credits the block reward to the block's beneficiary
    #[serde(rename_all = "camelCase")]
    MiningReward { beneficiary: Address, value: f64 },
}

impl TransactionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionKind::CreateAccount { .. } => "CREATE_ACCOUNT",
            TransactionKind::Transact { .. } => "TRANSACT",
            TransactionKind::MiningReward { .. } => "MINING_REWARD",
        }
    }
}

/// Every TRANSACT field except the signature; this is what the sender signs
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnsignedTransact<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    from: &'a Address,
    to: &'a Address,
    value: f64,
    gas_limit: u64,
}

/// Arguments for `Transaction::create_transaction`; the variant picks the kind
#[derive(Debug)]
pub enum TransactionArgs<'a> {
    /// A signed transfer from `account` to `to`
    Transact {
        account: &'a Account,
        to: Address,
        value: f64,
        gas_limit: u64,
    },

    /// The reward for whoever mines the block
    MiningReward { beneficiary: Address },

    /// Publishes `account` to the network
    CreateAccount { account: &'a Account },
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    #[serde(flatten)]
    pub kind: TransactionKind,
}

impl Transaction {
    /// Creates a transaction whose kind follows the shape of `args`
    pub fn create_transaction(args: TransactionArgs<'_>) -> Self {
        match args {
            TransactionArgs::Transact {
                account,
                to,
                value,
                gas_limit,
            } => Self::transact(account, to, value, gas_limit),
            TransactionArgs::MiningReward { beneficiary } => Self::mining_reward(beneficiary),
            TransactionArgs::CreateAccount { account } => Self::create_account(account),
        }
    }

    /// Creates a TRANSACT transaction signed by `account`
    pub fn transact(account: &Account, to: Address, value: f64, gas_limit: u64) -> Self {
        let id = Uuid::new_v4().to_string();
        let from = account.address().clone();

        let signature = account.sign(&UnsignedTransact {
            id: &id,
            kind: "TRANSACT",
            from: &from,
            to: &to,
            value,
            gas_limit,
        });

        Transaction {
            id,
            kind: TransactionKind::Transact {
                from,
                to,
                value,
                gas_limit,
                signature,
            },
        }
    }

    /// Creates the mining reward transaction for `beneficiary`
    pub fn mining_reward(beneficiary: Address) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            kind: TransactionKind::MiningReward {
                beneficiary,
                value: MINING_REWARD,
            },
        }
    }

    /// Creates a CREATE_ACCOUNT transaction embedding a snapshot of `account`
    pub fn create_account(account: &Account) -> Self {
        let account_data = match serde_json::to_value(account.to_data()) {
            Ok(JsonValue::Object(fields)) => fields,
            _ => Map::new(),
        };

        Transaction {
            id: Uuid::new_v4().to_string(),
            kind: TransactionKind::CreateAccount { account_data },
        }
    }

    fn unexpected_kind(&self, expected: &'static str) -> TransactionError {
        TransactionError::UnexpectedKind {
            id: self.id.clone(),
            expected,
        }
    }

    /// Validates a TRANSACT transaction against `state`
    ///
    /// Checks, in order: the signature, the value, that the sender can cover
    /// `value + gasLimit`, that the recipient exists, and that the recipient's
    /// code (if any) runs within `gasLimit`. The code runs against a copy of
    /// the recipient's storage, so validation leaves `state` untouched.
    pub fn validate_standard_transaction(
        transaction: &Transaction,
        state: &State,
    ) -> Result<(), TransactionError> {
        let TransactionKind::Transact {
            from,
            to,
            value,
            gas_limit,
            signature,
        } = &transaction.kind
        else {
            return Err(transaction.unexpected_kind("TRANSACT"));
        };

        let unsigned = UnsignedTransact {
            id: &transaction.id,
            kind: "TRANSACT",
            from,
            to,
            value: *value,
            gas_limit: *gas_limit,
        };

        if !Account::verify_signature(from, &unsigned, signature) {
            return Err(TransactionError::InvalidSignature(transaction.id.clone()));
        }

        if !value.is_finite() || *value < 0.0 {
            return Err(TransactionError::InvalidValue {
                id: transaction.id.clone(),
                value: *value,
            });
        }

        let from_account = state
            .get_account(from)
            .ok_or_else(|| TransactionError::NoSuchAccount(from.to_string()))?;

        let required = value + *gas_limit as f64;
        if required > from_account.balance {
            return Err(TransactionError::InsufficientBalance {
                required,
                available: from_account.balance,
            });
        }

        let to_account = state
            .get_account(to)
            .ok_or_else(|| TransactionError::NoSuchAccount(to.to_string()))?;

        if let Some(code_hash) = &to_account.code_hash {
            let mut storage_trie = state
                .storage_trie(&Address(code_hash.clone()))
                .cloned()
                .unwrap_or_default();

            let ExecutionResult { gas_used, .. } =
                Interpreter::new(&mut storage_trie).run_code(&to_account.code)?;

            if gas_used > *gas_limit {
                return Err(TransactionError::InsufficientGas {
                    provided: *gas_limit,
                    needed: gas_used,
                });
            }
        }

        Ok(())
    }

    /// Validates that a CREATE_ACCOUNT snapshot has exactly the account fields
    pub fn validate_create_account_transaction(
        transaction: &Transaction,
    ) -> Result<(), TransactionError> {
        let TransactionKind::CreateAccount { account_data } = &transaction.kind else {
            return Err(transaction.unexpected_kind("CREATE_ACCOUNT"));
        };

        let expected_fields = AccountData::schema_fields();

        if account_data.len() != expected_fields.len() {
            return Err(TransactionError::AccountDataFieldCount {
                expected: expected_fields.len(),
                got: account_data.len(),
            });
        }

        if let Some(field) = account_data
            .keys()
            .find(|field| !expected_fields.contains(field))
        {
            return Err(TransactionError::UnexpectedAccountDataField(field.clone()));
        }

        serde_json::from_value::<AccountData>(JsonValue::Object(account_data.clone()))
            .map_err(|e| TransactionError::MalformedAccountData(e.to_string()))?;

        Ok(())
    }

    /// Validates that a MINING_REWARD pays exactly the protocol reward
    pub fn validate_mining_reward_transaction(
        transaction: &Transaction,
    ) -> Result<(), TransactionError> {
        let TransactionKind::MiningReward { value, .. } = &transaction.kind else {
            return Err(transaction.unexpected_kind("MINING_REWARD"));
        };

        if *value != MINING_REWARD {
            return Err(TransactionError::InvalidMiningReward {
                provided: *value,
                expected: MINING_REWARD,
            });
        }

        Ok(())
    }

    /// Validates a single transaction of any kind
    pub fn validate_transaction(
        transaction: &Transaction,
        state: &State,
    ) -> Result<(), TransactionError> {
        match transaction.kind {
            TransactionKind::CreateAccount { .. } => {
                Self::validate_create_account_transaction(transaction)
            }
            TransactionKind::Transact { .. } => {
                Self::validate_standard_transaction(transaction, state)
            }
            TransactionKind::MiningReward { .. } => {
                Self::validate_mining_reward_transaction(transaction)
            }
        }
    }

    /// Validates every transaction of a series against the same state
    ///
    /// Stops at the first invalid transaction.
    pub fn validate_transaction_series(
        transaction_series: &[Transaction],
        state: &State,
    ) -> Result<(), TransactionError> {
        for transaction in transaction_series {
            Self::validate_transaction(transaction, state)?;
        }

        Ok(())
    }

    /// Applies a validated transaction to `state`
    pub fn run_transaction(transaction: &Transaction, state: &mut State) {
        match &transaction.kind {
            TransactionKind::Transact { .. } => {
                Self::run_standard_transaction(transaction, state);
                debug!(" -- Updated account data to reflect the standard transaction");
            }
            TransactionKind::CreateAccount { .. } => {
                Self::run_create_account_transaction(transaction, state);
                debug!(" -- Stored the new account data");
            }
            TransactionKind::MiningReward { .. } => {
                Self::run_mining_reward_transaction(transaction, state);
                debug!(" -- Updated the account data to reflect the mining reward");
            }
        }
    }

    fn run_standard_transaction(transaction: &Transaction, state: &mut State) {
        let TransactionKind::Transact {
            from,
            to,
            value,
            gas_limit,
            ..
        } = &transaction.kind
        else {
            return;
        };

        let (Some(mut from_account), Some(mut to_account)) =
            (state.get_account(from), state.get_account(to))
        else {
            warn!("Skipping transaction {}: unknown sender or recipient", transaction.id);
            return;
        };

        let mut gas_used = 0;

        if let Some(code_hash) = to_account.code_hash.clone() {
            let code_address = Address(code_hash);
            let mut storage_trie = state
                .storage_trie(&code_address)
                .cloned()
                .unwrap_or_default();

            match Interpreter::new(&mut storage_trie).run_code(&to_account.code) {
                Ok(ExecutionResult { result, gas_used: used }) => {
                    info!(
                        " -*- Smart contract execution: {} - RESULT: {}",
                        transaction.id,
                        result.map(|value| value.to_string()).unwrap_or_default()
                    );
                    *state.storage_trie_mut(&code_address) = storage_trie;
                    gas_used = used;
                }
                Err(err) => {
                    // Storage changes are discarded and the whole gas limit is spent
                    error!("Smart contract execution: {} failed: {}", transaction.id, err);
                    gas_used = *gas_limit;
                }
            }
        }

        let refund = *gas_limit as f64 - gas_used as f64;

        from_account.balance -= value;
        from_account.balance -= *gas_limit as f64;
        from_account.balance += refund;
        to_account.balance += value;
        to_account.balance += gas_used as f64;

        state.put_account(from, from_account);
        state.put_account(to, to_account);
    }

    fn run_create_account_transaction(transaction: &Transaction, state: &mut State) {
        let TransactionKind::CreateAccount { account_data } = &transaction.kind else {
            return;
        };

        match serde_json::from_value::<AccountData>(JsonValue::Object(account_data.clone())) {
            Ok(account_data) => {
                let key = match &account_data.code_hash {
                    Some(code_hash) => Address(code_hash.clone()),
                    None => account_data.address.clone(),
                };

                state.put_account(&key, account_data);
            }
            Err(err) => warn!(
                "Skipping transaction {}: malformed account data: {}",
                transaction.id, err
            ),
        }
    }

    fn run_mining_reward_transaction(transaction: &Transaction, state: &mut State) {
        let TransactionKind::MiningReward { beneficiary, value } = &transaction.kind else {
            return;
        };

        let mut account_data = state
            .get_account(beneficiary)
            .unwrap_or_else(|| AccountData::empty(beneficiary.clone()));

        account_data.balance += value;

        state.put_account(beneficiary, account_data);
    }
}
