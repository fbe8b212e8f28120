// API module
//
// This module contains the HTTP surface of a ledger node

pub mod handlers;
pub mod routes;

use utoipa::OpenApi;

use crate::blockchain;

// Re-export main components for easier access
pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_blockchain,
        handlers::mine_block,
        handlers::replace_chain,
        handlers::transact,
        handlers::get_balance,
        handlers::get_pending_transactions
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::BlockHeaders,
            handlers::ChainResponse,
            handlers::MineResponse,
            handlers::TransactBody,
            handlers::TransactionResponse,
            handlers::BalanceResponse,
            handlers::ReplaceChainRequest
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node endpoints")
    ),
    info(
        title = "Stake Ledger API",
        version = "0.1.0",
        description = "Accounts, contracts and proof-of-work blocks",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;
