mod common;

use common::{gate, spawn_app, stk_success, CALLBACK_SECRET};
use mpesa_settlement::config::{parse_allowed_ips, AllowedIps, CallbackGateConfig};
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

async fn pending_deposit(app: &common::TestApp, account: Uuid) -> String {
    let tx: Value = app
        .post_wallet("/mpesa/deposit", account, json!({"phone_number": "0712345678", "amount": 100}))
        .await
        .json()
        .await
        .unwrap();
    tx["correlation_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_callback_without_token_is_forbidden() {
    let app = spawn_app(gate(false, AllowedIps::Any)).await;
    let account = Uuid::new_v4();
    let checkout = pending_deposit(&app, account).await;

    let res = app
        .client
        .post(format!("{}/mpesa/callback", app.base_url))
        .json(&stk_success(&checkout, 100))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let ack: Value = res.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 1);
    assert_eq!(ack["ResultDesc"], "Forbidden");
    assert_eq!(app.get_wallet(account).await["balance"], 0);
}

#[tokio::test]
async fn test_callback_with_wrong_token_is_forbidden() {
    let app = spawn_app(gate(false, AllowedIps::Any)).await;
    let account = Uuid::new_v4();
    let checkout = pending_deposit(&app, account).await;

    let res = app
        .client
        .post(format!("{}/mpesa/callback?token=guess", app.base_url))
        .json(&stk_success(&checkout, 100))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.get_wallet(account).await["balance"], 0);
}

#[tokio::test]
async fn test_token_header_is_accepted() {
    let app = spawn_app(gate(false, AllowedIps::Any)).await;
    let account = Uuid::new_v4();
    let checkout = pending_deposit(&app, account).await;

    let res = app
        .client
        .post(format!("{}/mpesa/callback", app.base_url))
        .header("x-mpesa-token", CALLBACK_SECRET)
        .json(&stk_success(&checkout, 100))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(app.get_wallet(account).await["balance"], 100);
}

#[tokio::test]
async fn test_production_rejects_unlisted_origin_even_with_token() {
    let allowed = parse_allowed_ips("196.201.214.200").unwrap();
    let app = spawn_app(gate(true, allowed)).await;
    let account = Uuid::new_v4();
    let checkout = pending_deposit(&app, account).await;

    let res = app.post_callback("/mpesa/callback", &stk_success(&checkout, 100)).await;

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.get_wallet(account).await["balance"], 0);
}

#[tokio::test]
async fn test_production_accepts_listed_origin_with_token() {
    let allowed = parse_allowed_ips("127.0.0.1").unwrap();
    let app = spawn_app(gate(true, allowed)).await;
    let account = Uuid::new_v4();
    let checkout = pending_deposit(&app, account).await;

    let res = app.post_callback("/mpesa/callback", &stk_success(&checkout, 100)).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(app.get_wallet(account).await["balance"], 100);
}

#[tokio::test]
async fn test_missing_secret_refuses_every_callback() {
    let app = spawn_app(CallbackGateConfig {
        allowed_ips: AllowedIps::Any,
        enforce_origin: false,
        secret: None,
    })
    .await;

    let res = app
        .post_callback("/mpesa/callback", &stk_success("ws_CO_0", 100))
        .await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_unmatched_correlation_is_rejected_without_side_effects() {
    let app = spawn_app(gate(false, AllowedIps::Any)).await;
    let account = Uuid::new_v4();
    pending_deposit(&app, account).await;

    let res = app
        .post_callback("/mpesa/callback", &stk_success("ws_CO_unknown", 100))
        .await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let ack: Value = res.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 1);
    assert_eq!(app.get_wallet(account).await["balance"], 0);
}

#[tokio::test]
async fn test_malformed_callback_body_is_bad_request() {
    let app = spawn_app(gate(false, AllowedIps::Any)).await;

    let res = app
        .post_callback("/mpesa/b2c/result", &json!({"unexpected": true}))
        .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let ack: Value = res.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 1);
}

#[tokio::test]
async fn test_health_reports_gateway_circuit() {
    let app = spawn_app(gate(false, AllowedIps::Any)).await;

    let res = app
        .client
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["gateway_circuit"], "closed");
}
