//! Request signing for `/api` routes.
//!
//! Clients send `timestamp` (Unix milliseconds) and
//! `api-key = scrypt(timestamp, path ++ secret)` with every call. The timestamp
//! must fall within the configured window of server time.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::error::{ApiError, ResponseCode};
use super::handlers::auth::AuthState;
use crate::crypto::verify_api_key_async;

pub const TIMESTAMP_HEADER: &str = "timestamp";
pub const API_KEY_HEADER: &str = "api-key";
const SIGNED_PREFIX: &str = "/api/";

/// Axum middleware rejecting unsigned or stale `/api` requests.
///
/// # Errors
/// `SIGNATURE_INVALID` for missing, malformed or wrong headers and
/// `TIMESTAMP_EXPIRED` when the timestamp is outside the window.
pub async fn verify_signature(
    State(auth_state): State<Arc<AuthState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let config = auth_state.config();
    let path = request.uri().path();
    if !config.request_signing()
        || request.method() == Method::OPTIONS
        || !path.starts_with(SIGNED_PREFIX)
    {
        return Ok(next.run(request).await);
    }

    let (timestamp, api_key) = signature_headers(request.headers())?;

    let window_ms = config.signature_window_seconds().saturating_mul(1000);
    let drift_ms = Utc::now().timestamp_millis().saturating_sub(timestamp);
    if drift_ms.saturating_abs() > window_ms {
        debug!(drift_ms, "request timestamp outside window");
        return Err(ResponseCode::TimestampExpired.into());
    }

    let valid = verify_api_key_async(
        api_key,
        timestamp,
        path.to_string(),
        config.api_secret().to_string(),
    )
    .await
    .map_err(|err| ApiError::internal("Failed to verify request signature", err))?;
    if !valid {
        debug!(path, "request signature mismatch");
        return Err(ResponseCode::SignatureInvalid.into());
    }

    Ok(next.run(request).await)
}

fn signature_headers(headers: &HeaderMap) -> Result<(i64, String), ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ApiError::new(
                    ResponseCode::SignatureInvalid,
                    format!("Missing {name} header"),
                )
            })
    };

    let timestamp = header(TIMESTAMP_HEADER)?.parse::<i64>().map_err(|_| {
        ApiError::new(
            ResponseCode::SignatureInvalid,
            "timestamp must be Unix milliseconds",
        )
    })?;
    let api_key = header(API_KEY_HEADER)?.to_string();
    Ok((timestamp, api_key))
}
