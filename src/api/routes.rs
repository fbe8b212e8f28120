use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/blockchain", web::get().to(handlers::get_blockchain))
        .route("/blockchain/mine", web::get().to(handlers::mine_block))
        .route("/blockchain/replace", web::post().to(handlers::replace_chain))
        .route("/account/transact", web::post().to(handlers::transact))
        .route("/account/balance", web::get().to(handlers::get_balance))
        .route(
            "/transactions/pending",
            web::get().to(handlers::get_pending_transactions),
        );
}
