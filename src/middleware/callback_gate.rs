use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

use crate::config::CallbackGateConfig;
use crate::mpesa::payloads::CallbackAck;

const TOKEN_HEADERS: [&str; 2] = ["x-mpesa-token", "x-callback-token"];
const TOKEN_QUERY_PARAM: &str = "token";

/// Why a callback was turned away. Only logged; the provider gets a generic answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    ForbiddenOrigin,
    ForbiddenMissingToken,
    ForbiddenInvalidToken,
    SecretNotConfigured,
}

impl GateRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            GateRejection::ForbiddenOrigin => "origin not in provider allow-list",
            GateRejection::ForbiddenMissingToken => "missing callback token",
            GateRejection::ForbiddenInvalidToken => "invalid callback token",
            GateRejection::SecretNotConfigured => "callback secret not configured",
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::SecretNotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CallbackAck::rejected("Internal server error")),
            )
                .into_response(),
            _ => (StatusCode::FORBIDDEN, Json(CallbackAck::rejected("Forbidden"))).into_response(),
        }
    }
}

/// Resolved origin of an authenticated callback, available to handlers as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackOrigin(pub Option<IpAddr>);

/// Authenticates a provider notification: origin allow-list, then shared secret.
pub fn authenticate(
    config: &CallbackGateConfig,
    headers: &HeaderMap,
    query: Option<&str>,
    peer: Option<IpAddr>,
) -> Result<Option<IpAddr>, GateRejection> {
    let client_ip = resolve_client_ip(headers, peer);

    if config.enforce_origin {
        let allowed = client_ip
            .map(|ip| config.allowed_ips.contains(&ip))
            .unwrap_or(false);
        if !allowed {
            return Err(GateRejection::ForbiddenOrigin);
        }
    } else {
        tracing::debug!(client_ip = ?client_ip, "non-production mode: origin check skipped");
    }

    let expected = config
        .secret
        .as_deref()
        .ok_or(GateRejection::SecretNotConfigured)?;

    let provided = provided_token(headers, query).ok_or(GateRejection::ForbiddenMissingToken)?;

    if !tokens_match(provided.as_bytes(), expected.as_bytes()) {
        return Err(GateRejection::ForbiddenInvalidToken);
    }

    Ok(client_ip)
}

// Length is not treated as secret; equal-length inputs are compared without short-circuiting.
fn tokens_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected).into()
}

fn provided_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    for name in TOKEN_HEADERS {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// First `x-forwarded-for` entry, then `x-real-ip`, then the socket peer.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| parse_ip_entry(first.trim()));

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| parse_ip_entry(raw.trim()))
    };

    forwarded.or_else(real_ip).or(peer).map(unmap_ipv4)
}

fn parse_ip_entry(value: &str) -> Option<IpAddr> {
    if let Ok(ip) = IpAddr::from_str(value) {
        return Some(ip);
    }

    if let Ok(addr) = SocketAddr::from_str(value) {
        return Some(addr.ip());
    }

    None
}

/// `::ffff:a.b.c.d` becomes `a.b.c.d`.
fn unmap_ipv4(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

#[derive(Clone, Debug)]
pub struct CallbackGateLayer {
    config: Arc<CallbackGateConfig>,
}

impl CallbackGateLayer {
    pub fn new(config: CallbackGateConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for CallbackGateLayer {
    type Service = CallbackGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallbackGateService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CallbackGateService<S> {
    inner: S,
    config: Arc<CallbackGateConfig>,
}

impl<S, B> Service<Request<B>> for CallbackGateService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = futures_util::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|connect_info| connect_info.0.ip());
        let path = req.uri().path().to_string();

        match authenticate(&self.config, req.headers(), req.uri().query(), peer) {
            Ok(client_ip) => {
                tracing::info!(client_ip = ?client_ip, path = %path, "payment callback authenticated");
                req.extensions_mut().insert(CallbackOrigin(client_ip));
                let mut inner = self.inner.clone();
                Box::pin(async move { inner.call(req).await })
            }
            Err(rejection) => {
                let client_ip = resolve_client_ip(req.headers(), peer);
                match rejection {
                    GateRejection::SecretNotConfigured => tracing::error!(
                        path = %path,
                        "configuration error: callback secret not configured, refusing callback"
                    ),
                    _ => tracing::warn!(
                        client_ip = ?client_ip,
                        path = %path,
                        reason = rejection.reason(),
                        "rejected unauthenticated payment callback"
                    ),
                }
                let response = rejection.into_response();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
