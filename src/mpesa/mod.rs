//! Outbound client for the M-Pesa Daraja payment gateway.

pub mod client;
pub mod payloads;
pub mod phone;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use thiserror::Error;

use crate::domain::Amount;

pub use client::{ClientInitError, DarajaClient};
pub use payloads::{BulkAck, PushAck};
pub use phone::normalize_account_ref;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway authentication failed: {0}")]
    Auth(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("invalid account reference: {0}")]
    InvalidAccountReference(String),

    #[error("gateway rejected request ({code}): {description}")]
    Rejected { code: String, description: String },
}

impl GatewayError {
    /// Whether the failure says something about the provider's health.
    pub(crate) fn is_transport_failure(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// The outbound operations the settlement service needs from a provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Customer-facing push payment. The ack's `checkout_request_id` is the
    /// correlation id the result callback carries.
    async fn initiate_push(&self, account_ref: &str, amount: Amount) -> Result<PushAck, GatewayError>;

    /// Business-to-customer payment. The provider echoes
    /// `originator_conversation_id` on the result and timeout callbacks.
    async fn initiate_bulk(
        &self,
        account_ref: &str,
        amount: Amount,
        originator_conversation_id: &str,
    ) -> Result<BulkAck, GatewayError>;

    fn circuit_state(&self) -> &'static str {
        "closed"
    }
}

/// `TXN` + UTC timestamp to the millisecond + a random suffix,
/// e.g. `TXN202311210945301234567`.
pub fn originator_conversation_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("TXN{}{}", timestamp, suffix)
}
