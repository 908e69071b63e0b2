//! Access log for every route. URIs are logged without their query string
//! and bodies only in sanitized form, so callback tokens never reach the logs.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

use crate::utils::sanitize::{redact_query, sanitize_json};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Largest body that is buffered for logging; bigger ones pass through unlogged.
const MAX_LOGGED_BODY: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestLogConfig {
    /// `LOG_REQUEST_BODY=true`.
    pub log_bodies: bool,
}

pub async fn log_requests(
    State(config): State<RequestLogConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let request_id_value = HeaderValue::from_str(&request_id).ok();
    let method = req.method().clone();
    let uri = redact_query(req.uri());
    let start = Instant::now();

    if let Some(value) = request_id_value.clone() {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let body_summary = if config.log_bodies {
        let (summary, restored) = capture_body(req).await;
        req = restored;
        summary
    } else {
        None
    };

    match body_summary {
        Some(body) => tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            body = %body,
            "Incoming request"
        ),
        None => tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "Incoming request"
        ),
    }

    let mut response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Outgoing response"
    );

    if let Some(value) = request_id_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Buffers a body of known, small length and returns its sanitized form
/// together with a request carrying the same bytes. Anything else is left
/// untouched and not logged.
async fn capture_body(req: Request) -> (Option<String>, Request) {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match declared {
        Some(len) if len <= MAX_LOGGED_BODY => {}
        Some(len) => return (Some(format!("[{} bytes, not logged]", len)), req),
        None => return (None, req),
    }

    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(bytes) => {
            let summary = match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(json) => sanitize_json(&json).to_string(),
                Err(_) => format!("[non-json, {} bytes]", bytes.len()),
            };
            (Some(summary), Request::from_parts(parts, Body::from(bytes)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "request body could not be read for logging");
            (None, Request::from_parts(parts, Body::empty()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{routing::post, Router};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context as LayerContext, Layer as SubscriberLayer};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::registry::Registry;

    const SECRET: &str = "s3cr3t-callback-token";

    fn app(log_bodies: bool) -> Router {
        Router::new()
            .route("/mpesa/callback", post(|body: String| async move { body }))
            .layer(axum::middleware::from_fn_with_state(
                RequestLogConfig { log_bodies },
                log_requests,
            ))
    }

    fn callback_request(body: String) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(format!("/mpesa/callback?token={}", SECRET))
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn response_carries_request_id() {
        let response = app(false)
            .oneshot(callback_request(String::new()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn callback_token_never_reaches_the_logs() {
        let captured = Arc::new(Mutex::new(Vec::<String>::new()));
        let subscriber = Registry::default().with(CaptureLayer {
            events: Arc::clone(&captured),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let body = format!(r#"{{"token":"{}","ResultCode":0}}"#, SECRET);
        let response = app(true).oneshot(callback_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let events = captured.lock().unwrap();
        assert!(
            events.iter().any(|e| e.contains("uri=/mpesa/callback?[redacted]")),
            "expected redacted uri, got {:?}",
            *events
        );
        assert!(
            events.iter().all(|e| !e.contains(SECRET)),
            "token leaked into logs: {:?}",
            *events
        );
    }

    #[tokio::test]
    async fn oversized_body_passes_through_unlogged() {
        let body = "x".repeat(MAX_LOGGED_BODY + 1);
        let response = app(true)
            .oneshot(callback_request(body.clone()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let echoed = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(echoed.len(), body.len());
    }

    #[tokio::test]
    async fn logged_body_is_forwarded_intact() {
        let body = r#"{"Result":{"ResultCode":0}}"#.to_string();
        let response = app(true)
            .oneshot(callback_request(body.clone()))
            .await
            .unwrap();

        let echoed = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(echoed, body.as_bytes());
    }

    struct CaptureLayer {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl<S: Subscriber> SubscriberLayer<S> for CaptureLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
            let mut visitor = FieldVisitor::default();
            event.record(&mut visitor);
            self.events.lock().unwrap().push(visitor.fields.join(" "));
        }
    }

    #[derive(Default)]
    struct FieldVisitor {
        fields: Vec<String>,
    }

    impl tracing::field::Visit for FieldVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
