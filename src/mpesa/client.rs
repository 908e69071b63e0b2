use arc_swap::ArcSwapOption;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{FixedOffset, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use super::payloads::{
    AccessTokenResponse, B2cPaymentRequest, BulkAck, ProviderErrorBody, PushAck, StkPushRequest,
};
use super::{normalize_account_ref, GatewayError, PaymentGateway};
use crate::config::GatewayConfig;
use crate::domain::Amount;
use crate::utils::sanitize::sanitize_json;

pub const STK_CALLBACK_PATH: &str = "/mpesa/callback";
pub const B2C_RESULT_PATH: &str = "/mpesa/b2c/result";
pub const B2C_QUEUE_PATH: &str = "/mpesa/b2c/queue";

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const EAST_AFRICA_OFFSET_SECS: i32 = 3 * 3600;

#[derive(Error, Debug)]
pub enum ClientInitError {
    #[error("invalid callback base url: {0}")]
    CallbackUrl(#[from] url::ParseError),

    #[error("could not build http client: {0}")]
    Http(#[from] reqwest::Error),
}

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// HTTP client for the Daraja API.
///
/// Cloning is cheap; clones share the HTTP pool, the cached access token and
/// the circuit breaker.
#[derive(Clone)]
pub struct DarajaClient {
    client: Client,
    config: Arc<GatewayConfig>,
    callback_base: Url,
    token: Arc<ArcSwapOption<CachedToken>>,
    circuit_breaker: Breaker,
}

impl DarajaClient {
    pub fn new(config: GatewayConfig) -> Result<Self, ClientInitError> {
        Self::with_circuit_breaker(config, 3, 60)
    }

    /// Creates a client whose breaker opens after `failure_threshold`
    /// consecutive transport failures.
    pub fn with_circuit_breaker(
        config: GatewayConfig,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Result<Self, ClientInitError> {
        let callback_base = Url::parse(&config.callback_base_url)?;
        let client = Client::builder().timeout(config.http_timeout).build()?;

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Ok(DarajaClient {
            client,
            config: Arc::new(config),
            callback_base,
            token: Arc::new(ArcSwapOption::empty()),
            circuit_breaker,
        })
    }

    /// Returns a bearer token, reusing the cached one until shortly before it expires.
    ///
    /// The token exchange shares the circuit breaker with payment requests, so
    /// an unreachable provider opens the circuit whichever call notices first.
    pub async fn get_access_token(&self) -> Result<String, GatewayError> {
        if let Some(cached) = self.token.load_full() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url()
        );
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));

        tracing::debug!("requesting gateway access token");
        let client = self.client.clone();
        let fetched = self
            .circuit_breaker
            .call_with(
                |e: &GatewayError| e.is_transport_failure(),
                async move { request_token(&client, &url, &credentials).await },
            )
            .await;

        let token = match fetched {
            Ok(token) => token,
            Err(FailsafeError::Rejected) => return Err(circuit_open()),
            Err(FailsafeError::Inner(e)) => return Err(e),
        };

        let ttl = token
            .expires_in_secs()
            .map(Duration::from_secs)
            .map(|provider_ttl| provider_ttl.min(self.config.token_ttl))
            .unwrap_or(self.config.token_ttl)
            .saturating_sub(TOKEN_REFRESH_MARGIN);

        self.token.store(Some(Arc::new(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + ttl,
        })));

        Ok(token.access_token)
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Callback URL for `path`, carrying the shared secret as `?token=`.
    pub fn callback_url(&self, path: &str) -> String {
        let mut url = self.callback_base.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base_path, path));
        match &self.config.callback_secret {
            Some(secret) => {
                url.query_pairs_mut().append_pair("token", secret);
            }
            None => {
                tracing::warn!(path, "callback secret not configured; provider callbacks will be refused");
            }
        }
        url.to_string()
    }

    fn password(&self, timestamp: &str) -> String {
        STANDARD.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ))
    }

    async fn post_json<Req, Ack>(&self, path: &str, payload: &Req) -> Result<Ack, GatewayError>
    where
        Req: Serialize + Sync,
        Ack: DeserializeOwned + Send + 'static,
    {
        let access_token = self.get_access_token().await?;
        let url = format!("{}{}", self.base_url(), path);
        let body = serde_json::to_value(payload)
            .map_err(|e| GatewayError::Unavailable(format!("could not encode request: {}", e)))?;

        tracing::debug!(path, payload = %sanitize_json(&body), "sending gateway request");

        let client = self.client.clone();
        let token_cache = Arc::clone(&self.token);

        let result = self
            .circuit_breaker
            .call_with(
                |e: &GatewayError| e.is_transport_failure(),
                async move {
                    let response = client
                        .post(&url)
                        .bearer_auth(&access_token)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Ack>().await.map_err(|e| {
                            GatewayError::Unavailable(format!("unreadable acknowledgement: {}", e))
                        });
                    }

                    let error = response.json::<ProviderErrorBody>().await.ok();
                    let code = error
                        .as_ref()
                        .and_then(|e| e.error_code.clone())
                        .unwrap_or_else(|| status.as_u16().to_string());
                    let description = error
                        .and_then(|e| e.error_message)
                        .unwrap_or_else(|| status.to_string());

                    match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            token_cache.store(None);
                            Err(GatewayError::Auth(description))
                        }
                        s if s.is_server_error() => Err(GatewayError::Unavailable(format!(
                            "{} ({})",
                            description, code
                        ))),
                        _ => Err(GatewayError::Rejected { code, description }),
                    }
                },
            )
            .await;

        match result {
            Ok(ack) => Ok(ack),
            Err(FailsafeError::Rejected) => Err(circuit_open()),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

/// Client-credentials exchange. Unreachable or failing provider is
/// `Unavailable`; a refused or unreadable answer is `Auth`.
async fn request_token(
    client: &Client,
    url: &str,
    credentials: &str,
) -> Result<AccessTokenResponse, GatewayError> {
    let response = client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, format!("Basic {}", credentials))
        .send()
        .await
        .map_err(|e| GatewayError::Unavailable(format!("token request failed: {}", e)))?;

    let status = response.status();
    if status.is_server_error() {
        tracing::error!(status = %status, "token endpoint failing");
        return Err(GatewayError::Unavailable(format!(
            "token endpoint returned {}",
            status
        )));
    }
    if !status.is_success() {
        tracing::error!(status = %status, "gateway refused token request");
        return Err(GatewayError::Auth(format!("token endpoint returned {}", status)));
    }

    response
        .json::<AccessTokenResponse>()
        .await
        .map_err(|e| GatewayError::Auth(format!("malformed token response: {}", e)))
}

fn circuit_open() -> GatewayError {
    GatewayError::Unavailable("gateway circuit breaker is open".to_string())
}

/// `yyyyMMddHHmmss` in East Africa Time, as the provider expects.
fn provider_timestamp() -> String {
    let now = Utc::now();
    match FixedOffset::east_opt(EAST_AFRICA_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string(),
        None => now.format("%Y%m%d%H%M%S").to_string(),
    }
}

fn ensure_accepted(code: &str, description: &str) -> Result<(), GatewayError> {
    if code == "0" {
        Ok(())
    } else {
        Err(GatewayError::Rejected {
            code: code.to_string(),
            description: description.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl PaymentGateway for DarajaClient {
    async fn initiate_push(&self, account_ref: &str, amount: Amount) -> Result<PushAck, GatewayError> {
        let phone = normalize_account_ref(account_ref)?;
        let timestamp = provider_timestamp();

        let request = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: amount.minor_units(),
            party_a: phone.clone(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone,
            callback_url: self.callback_url(STK_CALLBACK_PATH),
            account_reference: "Wallet".to_string(),
            transaction_desc: "Wallet deposit".to_string(),
        };

        let ack: PushAck = self
            .post_json("/mpesa/stkpush/v1/processrequest", &request)
            .await?;
        ensure_accepted(&ack.response_code, &ack.response_description)?;

        tracing::info!(
            checkout_request_id = %ack.checkout_request_id,
            merchant_request_id = %ack.merchant_request_id,
            amount = %amount,
            "push payment accepted by gateway"
        );
        Ok(ack)
    }

    async fn initiate_bulk(
        &self,
        account_ref: &str,
        amount: Amount,
        originator_conversation_id: &str,
    ) -> Result<BulkAck, GatewayError> {
        let phone = normalize_account_ref(account_ref)?;

        let request = B2cPaymentRequest {
            originator_conversation_id: originator_conversation_id.to_string(),
            initiator_name: self.config.initiator_name.clone(),
            security_credential: self.config.security_credential.clone(),
            command_id: "SalaryPayment",
            amount: amount.minor_units(),
            party_a: self.config.shortcode.clone(),
            party_b: phone,
            remarks: "Wallet withdrawal".to_string(),
            queue_timeout_url: self.callback_url(B2C_QUEUE_PATH),
            result_url: self.callback_url(B2C_RESULT_PATH),
            occasion: "Withdrawal".to_string(),
        };

        let ack: BulkAck = self
            .post_json("/mpesa/b2c/v3/paymentrequest", &request)
            .await?;
        ensure_accepted(&ack.response_code, &ack.response_description)?;

        tracing::info!(
            originator_conversation_id,
            conversation_id = %ack.conversation_id,
            amount = %amount,
            "bulk payment accepted by gateway"
        );
        Ok(ack)
    }

    fn circuit_state(&self) -> &'static str {
        DarajaClient::circuit_state(self)
    }
}
