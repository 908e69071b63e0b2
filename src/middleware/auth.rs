use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Header the upstream session layer sets after authenticating the user.
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// The wallet account of the authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedAccount(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedAccount
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing account identity".to_string()))?;

        Uuid::parse_str(raw.trim())
            .map(AuthenticatedAccount)
            .map_err(|_| AppError::Unauthorized("invalid account identity".to_string()))
    }
}
