// Protocol constants and node configuration
//
// Everything consensus-relevant lives here so that every node derives the same
// genesis block, target hashes and rewards.

use std::env;

use log::warn;

/// Milliseconds in a second; block timestamps are unix milliseconds
pub const SECONDS: i64 = 1000;

/// Target time between two blocks
pub const MINE_RATE: i64 = 10 * SECONDS;

/// Balance every freshly generated account starts with
pub const STARTING_BALANCE: f64 = 500.0;

/// Value carried by every mining reward transaction
pub const MINING_REWARD: f64 = 12.5;

/// Maximum number of interpreter steps for a single program run
pub const EXECUTION_LIMIT: u64 = 25_000;

/// Width of a hex encoded hash
pub const HASH_LENGTH: usize = 64;

/// Genesis header values shared by every node
pub const GENESIS_PARENT_HASH: &str = "--genesis-parent-hash--";
pub const GENESIS_BENEFICIARY: &str = "--genesis-beneficiary--";
pub const GENESIS_DIFFICULTY: u64 = 1;
pub const GENESIS_TIMESTAMP: i64 = 0;
pub const GENESIS_TRANSACTIONS_ROOT: &str = "--genesis-transactions-root-";
pub const GENESIS_STATE_ROOT: &str = "--genesis-state-root--";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;

/// Runtime settings of the HTTP node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Interface the API binds to
    pub host: String,

    /// Port the API listens on
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl NodeConfig {
    /// Reads `LEDGER_HOST` and `LEDGER_PORT`, falling back to the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = NodeConfig::default();

        if let Some(host) = lookup("LEDGER_HOST") {
            config.host = host;
        }

        if let Some(port) = lookup("LEDGER_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(err) => warn!("Ignoring invalid LEDGER_PORT {:?}: {}", port, err),
            }
        }

        config
    }
}
