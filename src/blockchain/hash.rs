use serde::Serialize;
use sha3::{Digest, Keccak256};

/// Serializes `data` to JSON and sorts its characters
///
/// Two inputs whose encodings hold the same multiset of characters produce the
/// same string, so field order never changes a hash. The flip side is that
/// anagram encodings collide.
pub fn sort_characters<T: Serialize + ?Sized>(data: &T) -> String {
    // Ledger types are plain structs, strings, numbers and string-keyed maps
    let encoded = serde_json::to_string(data).expect("ledger values always encode to JSON");

    let mut characters: Vec<char> = encoded.chars().collect();
    characters.sort_unstable();
    characters.into_iter().collect()
}

/// Canonical content hash used for blocks, transactions, tries and signatures
///
/// # Returns
///
/// The Keccak-256 digest of the sorted encoding as 64 lowercase hex characters
pub fn keccak_hash<T: Serialize + ?Sized>(data: &T) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(sort_characters(data).as_bytes());
    hex::encode(hasher.finalize())
}
