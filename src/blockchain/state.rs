use std::collections::HashMap;

use super::account::AccountData;
use super::crypto::Address;
use super::interpreter::Value;
use super::trie::Trie;

/// The world state
///
/// One trie maps addresses (or code hashes) to account snapshots; every
/// account additionally owns a private storage trie used by contract code.
#[derive(Debug, Clone, Default)]
pub struct State {
    state_trie: Trie<AccountData>,
    storage_trie_map: HashMap<Address, Trie<Value>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes an account snapshot under `address`
    ///
    /// The stored snapshot's `storageRoot` is the current root hash of the
    /// account's storage trie, which is created on first write.
    pub fn put_account(&mut self, address: &Address, mut account_data: AccountData) {
        let storage_trie = self.storage_trie_map.entry(address.clone()).or_default();
        account_data.storage_root = Some(storage_trie.root_hash().to_string());

        self.state_trie.put(address.as_str(), account_data);
    }

    pub fn get_account(&self, address: &Address) -> Option<AccountData> {
        self.state_trie.get(address.as_str())
    }

    pub fn get_state_root(&self) -> &str {
        self.state_trie.root_hash()
    }

    pub fn storage_trie(&self, address: &Address) -> Option<&Trie<Value>> {
        self.storage_trie_map.get(address)
    }

    /// Storage trie of `address`, created empty if the account has none yet
    pub fn storage_trie_mut(&mut self, address: &Address) -> &mut Trie<Value> {
        self.storage_trie_map.entry(address.clone()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::account::Account;

    #[test]
    fn test_put_and_get_account() {
        let account = Account::new();
        let mut state = State::new();
        let empty_root = state.get_state_root().to_string();

        state.put_account(account.address(), account.to_data());

        let stored = state.get_account(account.address()).unwrap();
        assert_eq!(stored.balance, account.balance);
        assert_eq!(
            stored.storage_root.as_deref(),
            Some(Trie::<Value>::new().root_hash())
        );
        assert_ne!(state.get_state_root(), empty_root);
        assert!(state.get_account(&Address::from("nobody")).is_none());
    }

    #[test]
    fn test_storage_root_tracks_storage_trie() {
        let account = Account::new();
        let address = account.address().clone();
        let mut state = State::new();

        state.put_account(&address, account.to_data());
        state.storage_trie_mut(&address).put("foo", Value::from("bar"));

        // Not visible until the account is written again
        let before = state.get_account(&address).unwrap().storage_root;
        assert_ne!(before.as_deref(), state.storage_trie(&address).map(|t| t.root_hash()));

        let data = state.get_account(&address).unwrap();
        state.put_account(&address, data);
        assert_eq!(
            state.get_account(&address).unwrap().storage_root.as_deref(),
            state.storage_trie(&address).map(|t| t.root_hash())
        );
    }
}
