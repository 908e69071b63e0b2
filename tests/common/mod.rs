#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mpesa_settlement::adapters::{InMemoryAccountRepository, InMemoryTransactionRepository};
use mpesa_settlement::config::{AllowedIps, CallbackGateConfig};
use mpesa_settlement::middleware::request_logger::RequestLogConfig;
use mpesa_settlement::domain::Amount;
use mpesa_settlement::mpesa::{BulkAck, GatewayError, PaymentGateway, PushAck};
use mpesa_settlement::services::{Ledger, SettlementService};
use mpesa_settlement::{create_app, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const CALLBACK_SECRET: &str = "test-callback-secret";

/// Answers every request with a fresh checkout id; never talks to the network.
#[derive(Default)]
pub struct FakeGateway {
    pub calls: AtomicUsize,
    pub unavailable: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initiate_push(&self, _account_ref: &str, _amount: Amount) -> Result<PushAck, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".into()));
        }
        Ok(PushAck {
            merchant_request_id: format!("29115-{}", n),
            checkout_request_id: format!("ws_CO_{}", n),
            response_code: "0".into(),
            response_description: "Success. Request accepted for processing".into(),
            customer_message: None,
        })
    }

    async fn initiate_bulk(
        &self,
        _account_ref: &str,
        _amount: Amount,
        originator_conversation_id: &str,
    ) -> Result<BulkAck, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".into()));
        }
        Ok(BulkAck {
            conversation_id: "AG_20240101_0001".into(),
            originator_conversation_id: originator_conversation_id.to_string(),
            response_code: "0".into(),
            response_description: "Accept the service request successfully.".into(),
        })
    }
}

pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub gateway: Arc<FakeGateway>,
    pub ledger: Arc<Ledger>,
}

pub fn gate(enforce_origin: bool, allowed_ips: AllowedIps) -> CallbackGateConfig {
    CallbackGateConfig {
        allowed_ips,
        enforce_origin,
        secret: Some(CALLBACK_SECRET.to_string()),
    }
}

pub async fn spawn_app(gate: CallbackGateConfig) -> TestApp {
    let gateway = Arc::new(FakeGateway::default());
    let ledger = Arc::new(Ledger::new(
        Arc::new(InMemoryAccountRepository::new()),
        Arc::new(InMemoryTransactionRepository::new()),
        "KES",
    ));
    let settlement = Arc::new(SettlementService::new(ledger.clone(), gateway.clone()));
    let app = create_app(
        AppState {
            settlement,
            gateway: gateway.clone(),
        },
        gate,
        RequestLogConfig::default(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
        gateway,
        ledger,
    }
}

impl TestApp {
    pub async fn post_wallet(&self, path: &str, account: Uuid, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("x-account-id", account.to_string())
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn get_wallet(&self, account: Uuid) -> Value {
        self.client
            .get(format!("{}/mpesa/wallet", self.base_url))
            .header("x-account-id", account.to_string())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    pub async fn post_callback(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}?token={}", self.base_url, path, CALLBACK_SECRET))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// Deposits `amount` and confirms it through the push-payment callback.
    pub async fn fund(&self, account: Uuid, amount: i64) {
        let res = self
            .post_wallet("/mpesa/deposit", account, json!({"phone_number": "0712345678", "amount": amount}))
            .await;
        assert_eq!(res.status(), reqwest::StatusCode::ACCEPTED);
        let tx: Value = res.json().await.unwrap();
        let checkout = tx["correlation_id"].as_str().unwrap().to_string();
        let res = self.post_callback("/mpesa/callback", &stk_success(&checkout, amount)).await;
        assert_eq!(res.status(), reqwest::StatusCode::OK);
    }
}

pub fn stk_success(checkout_request_id: &str, amount: i64) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": amount},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "PhoneNumber", "Value": 254712345678u64}
                    ]
                }
            }
        }
    })
}

pub fn stk_cancelled(checkout_request_id: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }
        }
    })
}

pub fn b2c_result(originator_conversation_id: &str, result_code: i64) -> Value {
    json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": result_code,
            "ResultDesc": "The service request is processed successfully.",
            "OriginatorConversationID": originator_conversation_id,
            "ConversationID": "AG_20240101_0001",
            "TransactionID": "NLJ41HAY6Q"
        }
    })
}
