//! Wire types for the Daraja API: outbound requests, synchronous
//! acknowledgements and asynchronous result notifications.

use serde::{Deserialize, Serialize};

use crate::domain::{SettlementNotification, SettlementOutcome, TransactionKind};

#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    /// Seconds, sent by the provider as a string.
    #[serde(default)]
    pub expires_in: Option<serde_json::Value>,
}

impl AccessTokenResponse {
    pub fn expires_in_secs(&self) -> Option<u64> {
        match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: &'static str,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

/// Synchronous answer to a push-payment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAck {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct B2cPaymentRequest {
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "InitiatorName")]
    pub initiator_name: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: &'static str,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "Occasion")]
    pub occasion: String,
}

/// Synchronous answer to a bulk-payment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkAck {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    pub fn receipt_number(&self) -> Option<String> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == "MpesaReceiptNumber")
            .and_then(|item| match item.value.as_ref()? {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
    }

    pub fn into_notification(self, raw: serde_json::Value) -> SettlementNotification {
        let outcome = if self.result_code == 0 {
            SettlementOutcome::Success
        } else {
            SettlementOutcome::Failure
        };
        SettlementNotification {
            provider_reference: self.receipt_number(),
            correlation_id: self.checkout_request_id,
            kind: TransactionKind::Deposit,
            outcome,
            result_code: self.result_code,
            result_desc: self.result_desc,
            raw,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct B2cResultEnvelope {
    #[serde(rename = "Result")]
    pub result: B2cResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct B2cResult {
    #[serde(rename = "ResultType", default)]
    pub result_type: Option<i64>,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
}

impl B2cResult {
    /// Result-channel notification; the queue-timeout channel overrides the outcome.
    pub fn into_notification(self, raw: serde_json::Value) -> SettlementNotification {
        let outcome = if self.result_code == 0 {
            SettlementOutcome::Success
        } else {
            SettlementOutcome::Failure
        };
        SettlementNotification {
            correlation_id: self.originator_conversation_id,
            kind: TransactionKind::Withdrawal,
            outcome,
            result_code: self.result_code,
            result_desc: self.result_desc,
            provider_reference: self.transaction_id,
            raw,
        }
    }
}

/// What every callback endpoint answers the provider with. Code `0` tells
/// the provider the notification was taken; anything else invites a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    pub fn rejected(description: impl Into<String>) -> Self {
        Self {
            result_code: 1,
            result_desc: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stk_callback_extracts_receipt() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 100 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "Balance" },
                            { "Name": "PhoneNumber", "Value": 254708374149u64 }
                        ]
                    }
                }
            }
        });

        let envelope: StkCallbackEnvelope = serde_json::from_value(body).unwrap();
        let cb = envelope.body.stk_callback;
        assert_eq!(cb.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(cb.result_code, 0);
        assert_eq!(cb.receipt_number().as_deref(), Some("NLJ7RT61SV"));
    }

    #[test]
    fn failed_stk_callback_has_no_metadata() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "8555-67195-1",
                    "CheckoutRequestID": "ws_CO_27072017151044001",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });

        let envelope: StkCallbackEnvelope = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.body.stk_callback.result_code, 1032);
        assert!(envelope.body.stk_callback.receipt_number().is_none());
    }

    #[test]
    fn token_expiry_accepts_string_or_number() {
        let as_string: AccessTokenResponse =
            serde_json::from_value(json!({"access_token": "t", "expires_in": "3599"})).unwrap();
        let as_number: AccessTokenResponse =
            serde_json::from_value(json!({"access_token": "t", "expires_in": 3599})).unwrap();
        assert_eq!(as_string.expires_in_secs(), Some(3599));
        assert_eq!(as_number.expires_in_secs(), Some(3599));
    }

    #[test]
    fn b2c_request_uses_provider_field_names() {
        let req = B2cPaymentRequest {
            originator_conversation_id: "TXN1".into(),
            initiator_name: "api".into(),
            security_credential: "cred".into(),
            command_id: "SalaryPayment",
            amount: 50,
            party_a: "600000".into(),
            party_b: "254712345678".into(),
            remarks: "r".into(),
            queue_timeout_url: "https://x/q".into(),
            result_url: "https://x/r".into(),
            occasion: "Withdrawal".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["OriginatorConversationID"], "TXN1");
        assert_eq!(value["QueueTimeOutURL"], "https://x/q");
        assert_eq!(value["Amount"], 50);
    }
}
