use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::{verify_signature, Address, DigitalSignature, KeyPair};
use super::hash::keccak_hash;
use super::interpreter::Value;
use super::state::State;
use crate::config::STARTING_BALANCE;

/// Errors that can occur during account operations
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),
}

/// Snapshot of an account as it travels in transactions and lives in the state trie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    /// The account's address
    pub address: Address,

    /// The account's balance
    pub balance: f64,

    /// Contract code, empty for plain wallets
    pub code: Vec<Value>,

    /// Hash of address and code, `null` for plain wallets
    pub code_hash: Option<String>,

    /// Root hash of the account's storage trie, stamped by the state on every write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,
}

impl AccountData {
    /// Creates an empty record for an address that has no account yet
    pub fn empty(address: Address) -> Self {
        AccountData {
            address,
            balance: 0.0,
            code: Vec::new(),
            code_hash: None,
            storage_root: None,
        }
    }

    /// Field names a transmitted account snapshot must carry, no more and no fewer
    pub fn schema_fields() -> Vec<String> {
        match serde_json::to_value(AccountData::empty(Address::default())) {
            Ok(serde_json::Value::Object(fields)) => fields.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// A keypair-backed ledger account
///
/// Accounts without code are plain wallets; accounts with code are contract
/// targets and are stored in the state under their code hash.
#[derive(Debug, Clone)]
pub struct Account {
    key_pair: KeyPair,

    /// Starting balance of the account
    pub balance: f64,

    code: Vec<Value>,
    code_hash: Option<String>,
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

impl Account {
    /// Creates a plain wallet account with a fresh keypair
    pub fn new() -> Self {
        Self::with_code(Vec::new())
    }

    /// Creates an account carrying contract code
    pub fn with_code(code: Vec<Value>) -> Self {
        let key_pair = KeyPair::generate();
        let code_hash = Self::generate_code_hash(key_pair.address(), &code);

        Account {
            key_pair,
            balance: STARTING_BALANCE,
            code,
            code_hash,
        }
    }

    fn generate_code_hash(address: &Address, code: &[Value]) -> Option<String> {
        if code.is_empty() {
            return None;
        }

        let rendered: Vec<String> = code.iter().map(|word| word.to_string()).collect();
        Some(keccak_hash(&format!("{}{}", address, rendered.join(","))))
    }

    pub fn address(&self) -> &Address {
        self.key_pair.address()
    }

    pub fn code(&self) -> &[Value] {
        &self.code
    }

    pub fn code_hash(&self) -> Option<&str> {
        self.code_hash.as_deref()
    }

    /// Key this account is stored under in the state trie
    pub fn state_key(&self) -> Address {
        match &self.code_hash {
            Some(code_hash) => Address(code_hash.clone()),
            None => self.address().clone(),
        }
    }

    /// Signs the canonical hash of `data`
    pub fn sign<T: Serialize + ?Sized>(&self, data: &T) -> DigitalSignature {
        self.key_pair.sign(keccak_hash(data).as_bytes())
    }

    /// Serializable snapshot of the account
    pub fn to_data(&self) -> AccountData {
        AccountData {
            address: self.address().clone(),
            balance: self.balance,
            code: self.code.clone(),
            code_hash: self.code_hash.clone(),
            storage_root: None,
        }
    }

    /// Checks `signature` over the canonical hash of `data`
    ///
    /// # Returns
    ///
    /// `false` for a bad signature as well as for an unparsable key or signature
    pub fn verify_signature<T: Serialize + ?Sized>(
        public_key: &Address,
        data: &T,
        signature: &DigitalSignature,
    ) -> bool {
        let Ok(public_key) = public_key.to_public_key() else {
            return false;
        };

        verify_signature(keccak_hash(data).as_bytes(), signature, &public_key).unwrap_or(false)
    }

    /// Current balance recorded for `address` in `state`
    pub fn calculate_balance(address: &Address, state: &State) -> Result<f64, AccountError> {
        state
            .get_account(address)
            .map(|account| account.balance)
            .ok_or_else(|| AccountError::AccountNotFound(address.to_string()))
    }
}
