//! Password and one-time-code login. Both end with a short-lived ticket.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::state::AuthState;
use super::types::{LoginRequest, LoginType, TicketResponse};
use crate::api::error::{ApiError, ResponseCode, respond};
use crate::crypto::{derive_key_async, verify_password_async};
use crate::otp::{OtpChannel, OtpState};
use crate::storage::{DynStorage, User};
use crate::validation::Identity;

#[utoipa::path(
    post,
    path = "/api/user/login",
    request_body = LoginRequest,
    responses(
        (status = 201, description = "Login ticket issued", body = TicketResponse),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "user"
)]
pub async fn login(
    storage: Extension<DynStorage>,
    auth_state: Extension<Arc<AuthState>>,
    otp: Extension<Arc<OtpState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    let identity =
        Identity::parse(&request.identity).ok_or_else(|| ApiError::invalid("Invalid identity"))?;
    let user = find_user(&storage, &identity).await?;

    let authenticated = match request.login_type {
        LoginType::Password => {
            let password = request
                .password
                .filter(|password| !password.is_empty())
                .ok_or_else(|| ApiError::invalid("Password is required"))?;
            check_password(user.as_ref(), password).await?
        }
        LoginType::Otp => {
            let code = request
                .code
                .filter(|code| !code.trim().is_empty())
                .ok_or_else(|| ApiError::invalid("Code is required"))?;
            match &user {
                Some(_) => otp.consume(channel_for(&identity), identity.value(), &code).await,
                None => false,
            }
        }
    };

    let user = match user {
        Some(user) if authenticated => user,
        _ => {
            warn!(login_type = ?request.login_type, "login rejected");
            return Err(ResponseCode::CredentialsInvalid.into());
        }
    };

    let ticket = auth_state
        .tickets()
        .issue(user.id)
        .await
        .map_err(|err| ApiError::internal("Failed to issue ticket", err))?;

    info!(user_id = user.id, login_type = ?request.login_type, "login ticket issued");
    Ok(respond(StatusCode::CREATED, TicketResponse { ticket }))
}

async fn find_user(storage: &DynStorage, identity: &Identity) -> Result<Option<User>, ApiError> {
    let result = match identity {
        Identity::Email(email) => storage.find_user_by_email(email).await,
        Identity::Phone(phone) => storage.find_user_by_phone(phone).await,
    };
    result.map_err(|err| ApiError::internal("Failed to lookup user", err))
}

async fn check_password(user: Option<&User>, password: String) -> Result<bool, ApiError> {
    let Some(user) = user else {
        // Spend the same derivation cost for unknown identities.
        derive_key_async(password.into_bytes(), b"idecs-unknown-user".to_vec())
            .await
            .map_err(|err| ApiError::internal("Failed to derive key", err))?;
        return Ok(false);
    };

    verify_password_async(password, user.password_hash.clone())
        .await
        .map_err(|err| ApiError::internal("Failed to verify password", err))
}

fn channel_for(identity: &Identity) -> OtpChannel {
    match identity {
        Identity::Email(_) => OtpChannel::Email,
        Identity::Phone(_) => OtpChannel::Sms,
    }
}
