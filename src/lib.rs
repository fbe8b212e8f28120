//! An account-based proof-of-work ledger
//!
//! Accounts live in a trie-backed world state, may carry code for a small
//! gas-metered stack machine, and move value through signed transactions
//! that are mined into blocks.

pub mod api;
pub mod blockchain;
pub mod config;
pub mod node;
