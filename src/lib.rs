pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod mpesa;
pub mod ports;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::config::CallbackGateConfig;
use crate::middleware::request_logger::{log_requests, RequestLogConfig};
use crate::middleware::CallbackGateLayer;
use crate::mpesa::PaymentGateway;
use crate::services::SettlementService;

#[derive(Clone)]
pub struct AppState {
    pub settlement: Arc<SettlementService>,
    pub gateway: Arc<dyn PaymentGateway>,
}

pub fn create_app(state: AppState, gate: CallbackGateConfig, request_log: RequestLogConfig) -> Router {
    let wallet_routes = Router::new()
        .route("/mpesa/deposit", post(handlers::wallet::deposit))
        .route("/mpesa/withdraw", post(handlers::wallet::withdraw))
        .route("/mpesa/wallet", get(handlers::wallet::wallet))
        .route("/mpesa/transactions", get(handlers::wallet::transactions))
        .layer(CorsLayer::permissive());

    let callback_routes = Router::new()
        .route(mpesa::client::STK_CALLBACK_PATH, post(handlers::mpesa::stk_callback))
        .route(mpesa::client::B2C_RESULT_PATH, post(handlers::mpesa::b2c_result))
        .route(mpesa::client::B2C_QUEUE_PATH, post(handlers::mpesa::b2c_queue_timeout))
        .route_layer(CallbackGateLayer::new(gate));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(wallet_routes)
        .merge(callback_routes)
        .layer(axum::middleware::from_fn_with_state(request_log, log_requests))
        .with_state(state)
}
