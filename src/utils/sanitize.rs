use serde_json::Value;

/// Sanitizes sensitive fields in JSON payloads for logging
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(key, val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

// Gateway payloads use PascalCase keys, so matching is case-insensitive.
fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "password"
            | "passkey"
            | "secret"
            | "token"
            | "access_token"
            | "authorization"
            | "securitycredential"
            | "callbackurl"
            | "resulturl"
            | "queuetimeouturl"
            | "phonenumber"
            | "phone_number"
            | "partya"
            | "partyb"
    )
}

fn mask_value(key: &str, value: &Value) -> Value {
    // URLs carry the token in the query, so no part of them is shown.
    let partial_ok = !key.to_lowercase().ends_with("url");
    match value {
        Value::String(s) if partial_ok && s.len() > 8 && s.is_ascii() => {
            let visible = &s[..4];
            let masked = "****";
            let end = &s[s.len() - 4..];
            Value::String(format!("{}{}{}", visible, masked, end))
        }
        _ => Value::String("****".to_string()),
    }
}

/// Strips the query string from a URI before it is logged; callback
/// URLs carry the shared secret there.
pub fn redact_query(uri: &axum::http::Uri) -> String {
    match uri.query() {
        Some(_) => format!("{}?[redacted]", uri.path()),
        None => uri.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_gateway_payload() {
        let input = json!({
            "BusinessShortCode": "174379",
            "Password": "MTc0Mzc5YmZiMjc5ZjlhYTliZGJjZjE1OGU5N2Rk",
            "PhoneNumber": "254712345678",
            "CallBackURL": "https://wallet.example.com/mpesa/callback?token=abc",
            "Amount": 100
        });

        let sanitized = sanitize_json(&input);

        assert_eq!(sanitized["BusinessShortCode"], "174379");
        assert_eq!(sanitized["Amount"], 100);
        assert!(sanitized["Password"].as_str().unwrap().contains("****"));
        assert_eq!(sanitized["PhoneNumber"], "2547****5678");
        assert_eq!(sanitized["CallBackURL"], "****");
    }

    #[test]
    fn test_sanitize_nested() {
        let input = json!({
            "request": {
                "SecurityCredential": "very-long-credential-value",
                "Remarks": "Withdrawal"
            }
        });

        let sanitized = sanitize_json(&input);
        assert!(sanitized["request"]["SecurityCredential"]
            .as_str()
            .unwrap()
            .contains("****"));
        assert_eq!(sanitized["request"]["Remarks"], "Withdrawal");
    }

    #[test]
    fn test_short_secret_fully_masked() {
        let sanitized = sanitize_json(&json!({"token": "abc"}));
        assert_eq!(sanitized["token"], "****");
    }

    #[test]
    fn test_redact_query() {
        let uri: axum::http::Uri = "/mpesa/callback?token=abc".parse().unwrap();
        assert_eq!(redact_query(&uri), "/mpesa/callback?[redacted]");
        let plain: axum::http::Uri = "/health".parse().unwrap();
        assert_eq!(redact_query(&plain), "/health");
    }
}
