// Ledger core
//
// This module contains the consensus-relevant parts of the ledger:
// - Canonical hashing and the prefix trie
// - Keys, accounts and the world state
// - The contract interpreter
// - Transactions, blocks and the chain
// - The pending transaction queue

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod hash;
pub mod interpreter;
pub mod queue;
pub mod state;
pub mod transaction;
pub mod trie;

// Re-export main components for easier access
pub use account::{Account, AccountData};
pub use block::{Block, BlockHeaders};
pub use chain::Blockchain;
pub use crypto::{Address, DigitalSignature};
pub use interpreter::{Interpreter, OpCode, Value};
pub use queue::TransactionQueue;
pub use state::State;
pub use transaction::{Transaction, TransactionArgs, TransactionKind};
pub use trie::Trie;
