//! Authenticated principal extraction.

use axum::http::HeaderMap;

use super::session::authenticate_session;
use crate::api::error::{ApiError, ResponseCode};
use crate::storage::DynStorage;

/// Caller identity derived from the session token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: i64,
    /// Hash of the presenting session, kept so password changes can spare it.
    pub token_hash: Vec<u8>,
}

/// Resolve the session token into a principal, or fail with `UNAUTHORIZED`.
pub async fn require_auth(
    headers: &HeaderMap,
    storage: &DynStorage,
) -> Result<Principal, ApiError> {
    match authenticate_session(headers, storage).await? {
        Some((record, token_hash)) => Ok(Principal {
            user_id: record.user_id,
            token_hash,
        }),
        None => Err(ApiError::from_code(ResponseCode::Unauthorized)),
    }
}
