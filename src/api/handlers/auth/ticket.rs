//! Exchange a login ticket for a session token.

use axum::{
    extract::{Extension, Query, rejection::QueryRejection},
    http::{StatusCode, header::SET_COOKIE},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::session::session_cookie;
use super::state::AuthState;
use super::types::{TicketQuery, TokenResponse};
use crate::api::error::{ApiError, ResponseCode, respond};
use crate::crypto::{generate_token, hash_token};
use crate::storage::DynStorage;

#[utoipa::path(
    get,
    path = "/api/user/ticket/validate",
    params(TicketQuery),
    responses(
        (status = 200, description = "Session token issued and set as the `token` cookie", body = TokenResponse),
        (status = 401, description = "Unknown, expired or used ticket")
    ),
    tag = "user"
)]
pub async fn validate_ticket(
    storage: Extension<DynStorage>,
    auth_state: Extension<Arc<AuthState>>,
    query: Result<Query<TicketQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let ticket = query.ticket.trim();
    if ticket.is_empty() {
        return Err(ResponseCode::TicketInvalid.into());
    }

    let user_id = auth_state
        .tickets()
        .take(ticket)
        .await
        .ok_or_else(|| ApiError::from_code(ResponseCode::TicketInvalid))?;

    let token =
        generate_token().map_err(|err| ApiError::internal("Failed to generate token", err))?;
    storage
        .insert_session(
            user_id,
            &hash_token(&token),
            auth_state.config().session_ttl_seconds(),
        )
        .await
        .map_err(|err| ApiError::internal("Failed to create session", err))?;
    debug!(user_id, "session created");

    let mut response = respond(StatusCode::OK, TokenResponse { token: token.clone() });
    match session_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    Ok(response)
}
