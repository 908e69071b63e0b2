pub mod mpesa;
pub mod wallet;

use crate::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub gateway_circuit: String,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let circuit = state.gateway.circuit_state();

    // An open breaker degrades money movement but the ledger stays readable.
    let status = if circuit == "open" { "degraded" } else { "healthy" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        gateway_circuit: circuit.to_string(),
    })
}
