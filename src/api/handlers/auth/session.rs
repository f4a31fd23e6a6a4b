//! Session cookie handling and logout.

use axum::{
    extract::Extension,
    http::{
        HeaderMap, HeaderValue,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::Response,
};
use std::sync::Arc;
use tracing::error;

use super::state::{AuthConfig, AuthState};
use crate::api::error::{ApiError, respond_empty};
use crate::crypto::hash_token;
use crate::storage::{DynStorage, SessionRecord};

pub(crate) const SESSION_COOKIE_NAME: &str = "token";

#[utoipa::path(
    post,
    path = "/api/user/logout",
    responses(
        (status = 200, description = "Session cleared")
    ),
    tag = "user"
)]
pub async fn logout(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(err) = storage.delete_session(&hash_token(&token)).await {
            error!("Failed to delete session: {err}");
        }
    }

    // The cookie is cleared even when no session matched.
    let mut response = respond_empty();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

/// Resolve the presented token into a session record and its hash.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    storage: &DynStorage,
) -> Result<Option<(SessionRecord, Vec<u8>)>, ApiError> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_token(&token);
    match storage.lookup_session(&token_hash).await {
        Ok(record) => Ok(record.map(|record| (record, token_hash))),
        Err(err) => Err(ApiError::internal("Failed to lookup session", err)),
    }
}

pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Bearer header first, then the `token` cookie.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        let val = val.trim();
        (key.trim() == SESSION_COOKIE_NAME && !val.is_empty()).then(|| val.to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
