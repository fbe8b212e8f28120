use actix_web::{web, HttpResponse, Responder};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::blockchain::{Address, Block, Transaction, Value};
use crate::node::{Node, NodeError, TransactRequest};

/// Shared node handle
pub type NodeData = web::Data<Node>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The blocks in the chain, genesis first
    pub chain: Vec<Block>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The newly mined block
    pub block: Block,
}

/// Request for the transact endpoint
///
/// Leave out `to` to publish a new account, optionally carrying contract code.
#[derive(Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransactBody {
    /// Contract code for a new account
    #[schema(value_type = Option<Vec<Object>>)]
    pub code: Option<Vec<Value>>,

    /// Gas the sender is willing to spend on the recipient's code
    pub gas_limit: Option<u64>,

    /// Recipient address or contract code hash
    pub to: Option<String>,

    /// Amount to transfer
    pub value: Option<f64>,
}

/// Response for the transact endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The queued transaction
    #[schema(value_type = Object)]
    pub transaction: Transaction,
}

/// Query for the balance endpoint
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BalanceQuery {
    /// Account to look up, the node's own account when absent
    pub address: Option<String>,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub balance: f64,
}

/// Request for the replace endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ReplaceChainRequest {
    /// The peer's chain, genesis first
    pub chain: Vec<Block>,
}

/// Maps a node failure to a JSON error response
fn error_response(err: NodeError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        NodeError::Blockchain(_) | NodeError::Transaction(_) => {
            warn!("Bad request: {}", err);
            HttpResponse::BadRequest().json(body)
        }
        NodeError::Account(_) => HttpResponse::NotFound().json(body),
    }
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/blockchain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_blockchain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(ChainResponse {
        chain: node.chain(),
    })
}

/// Mine a new block
///
/// Mines every queued transaction plus the node's reward into a block and
/// adds it to the chain
#[utoipa::path(
    get,
    path = "/blockchain/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "The mined block was rejected"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(node: NodeData) -> impl Responder {
    let node = node.into_inner();

    match tokio::task::spawn_blocking(move || node.mine()).await {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse { block }),
        Ok(Err(err)) => error_response(err),
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Mining task failed: {}", err)
            }))
        }
    }
}

/// Create a new transaction
///
/// Queues a CREATE_ACCOUNT transaction when `to` is absent, otherwise a
/// transfer signed by the node's account
#[utoipa::path(
    post,
    path = "/account/transact",
    request_body = TransactBody,
    responses(
        (status = 200, description = "Transaction queued", body = TransactionResponse),
        (status = 400, description = "Malformed request body or invalid transaction")
    )
)]
pub async fn transact(node: NodeData, body: web::Json<TransactBody>) -> impl Responder {
    let body = body.into_inner();

    let request = TransactRequest {
        code: body.code,
        gas_limit: body.gas_limit,
        to: body.to.map(Address),
        value: body.value,
    };

    match node.transact(request) {
        Ok(transaction) => HttpResponse::Ok().json(TransactionResponse { transaction }),
        Err(err) => error_response(err),
    }
}

/// Get an account balance
#[utoipa::path(
    get,
    path = "/account/balance",
    params(BalanceQuery),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 404, description = "Unknown account")
    )
)]
pub async fn get_balance(node: NodeData, query: web::Query<BalanceQuery>) -> impl Responder {
    let address = query.into_inner().address.map(Address);

    match node.balance(address) {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse { balance }),
        Err(err) => error_response(err),
    }
}

/// Replace the chain with a peer's chain
#[utoipa::path(
    post,
    path = "/blockchain/replace",
    request_body = ReplaceChainRequest,
    responses(
        (status = 200, description = "Chain replaced"),
        (status = 400, description = "The chain was rejected")
    )
)]
pub async fn replace_chain(
    node: NodeData,
    request: web::Json<ReplaceChainRequest>,
) -> impl Responder {
    let chain = request.into_inner().chain;
    let length = chain.len();

    match node.replace_chain(chain) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Synchronized blockchain",
            "length": length
        })),
        Err(err) => error_response(err),
    }
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully")
    )
)]
pub async fn get_pending_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.transaction_queue().get_transaction_series())
}
