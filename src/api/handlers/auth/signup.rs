//! Account creation with a one-time code proving ownership of the identity.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::state::AuthState;
use super::types::SignupRequest;
use crate::api::error::{ApiError, ResponseCode, respond};
use crate::api::handlers::users::UserView;
use crate::crypto::hash_password_async;
use crate::otp::{OtpChannel, OtpState};
use crate::storage::{CreateUserOutcome, DynStorage, NewUser};
use crate::validation::{check_phone, normalize_email, valid_email, valid_username};

#[utoipa::path(
    post,
    path = "/api/user/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created", body = UserView),
        (status = 400, description = "Invalid input, password policy or code"),
        (status = 409, description = "Email or phone already registered")
    ),
    tag = "user"
)]
pub async fn signup(
    storage: Extension<DynStorage>,
    auth_state: Extension<Arc<AuthState>>,
    otp: Extension<Arc<OtpState>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    let (channel, target, email, phone) = signup_identity(&request)?;

    let profile = match request.profile {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(ApiError::invalid("profile must be an object")),
    };
    let username = match profile.get("username") {
        Some(Value::String(name)) if valid_username(name) => Some(name.trim().to_string()),
        Some(Value::String(_)) => return Err(ApiError::invalid("Invalid username")),
        _ => None,
    };

    auth_state
        .config()
        .password_policy()
        .check(&request.password)
        .map_err(|err| ApiError::new(ResponseCode::PasswordPolicy, err.to_string()))?;
    if request.password != request.confirm_password {
        return Err(ResponseCode::PasswordMismatch.into());
    }

    let existing = match (&email, &phone) {
        (Some(email), _) => storage.find_user_by_email(email).await,
        (_, Some(phone)) => storage.find_user_by_phone(phone).await,
        (None, None) => Ok(None),
    }
    .map_err(|err| ApiError::internal("Failed to look up user", err))?;
    if existing.is_some() {
        warn!(%channel, "signup for an existing identity");
        return Err(ResponseCode::UserExists.into());
    }

    // The code is only spent once the rest of the request is known to be valid.
    if !otp.consume(channel, &target, &request.code).await {
        return Err(ResponseCode::OtpInvalid.into());
    }

    let password_hash = hash_password_async(request.password)
        .await
        .map_err(|err| ApiError::internal("Failed to hash password", err))?;

    let outcome = storage
        .create_user(NewUser {
            username,
            email,
            phone,
            password_hash,
            profile: Value::Object(profile),
        })
        .await
        .map_err(|err| ApiError::internal("Failed to create user", err))?;

    match outcome {
        CreateUserOutcome::Created(user) => {
            info!(user_id = user.id, %channel, "user signed up");
            Ok(respond(StatusCode::CREATED, UserView::from(user)))
        }
        CreateUserOutcome::Conflict => {
            warn!(%channel, "signup for an existing identity");
            Err(ResponseCode::UserExists.into())
        }
    }
}

type SignupIdentity = (OtpChannel, String, Option<String>, Option<String>);

/// Exactly one of email or phone, normalized.
fn signup_identity(request: &SignupRequest) -> Result<SignupIdentity, ApiError> {
    let email = request
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|email| !email.is_empty());
    let phone = request
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty())
        .map(str::to_string);

    match (email, phone) {
        (Some(email), None) => {
            if !valid_email(&email) {
                return Err(ApiError::invalid("Invalid email"));
            }
            Ok((OtpChannel::Email, email.clone(), Some(email), None))
        }
        (None, Some(phone)) => {
            check_phone(&phone).map_err(|err| ApiError::invalid(err.to_string()))?;
            Ok((OtpChannel::Sms, phone.clone(), None, Some(phone)))
        }
        (Some(_), Some(_)) => Err(ApiError::invalid("Provide either email or phone, not both")),
        (None, None) => Err(ApiError::invalid("Email or phone is required")),
    }
}
