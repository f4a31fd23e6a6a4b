//! One-time code issue and verification over SMS and email.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ResponseCode, respond_empty};
use crate::otp::{OtpChannel, OtpError, OtpState};
use crate::validation::{check_phone, normalize_email, valid_email};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SmsOtpRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmailOtpRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SmsVerifyRequest {
    pub phone: String,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmailVerifyRequest {
    pub email: String,
    pub code: String,
}

#[utoipa::path(
    post,
    path = "/api/otp/sms",
    request_body = SmsOtpRequest,
    responses(
        (status = 200, description = "Code sent"),
        (status = 400, description = "Invalid phone number"),
        (status = 429, description = "Resend cooldown active")
    ),
    tag = "otp"
)]
pub async fn send_sms(
    otp: Extension<Arc<OtpState>>,
    payload: Result<Json<SmsOtpRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let phone = phone_target(&request.phone)?;
    issue(&otp, OtpChannel::Sms, &phone).await
}

#[utoipa::path(
    post,
    path = "/api/otp/email",
    request_body = EmailOtpRequest,
    responses(
        (status = 200, description = "Code sent"),
        (status = 400, description = "Invalid email"),
        (status = 429, description = "Resend cooldown active")
    ),
    tag = "otp"
)]
pub async fn send_email(
    otp: Extension<Arc<OtpState>>,
    payload: Result<Json<EmailOtpRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let email = email_target(&request.email)?;
    issue(&otp, OtpChannel::Email, &email).await
}

#[utoipa::path(
    post,
    path = "/api/otp/sms/verify",
    request_body = SmsVerifyRequest,
    responses(
        (status = 200, description = "Code is valid"),
        (status = 400, description = "Invalid or expired code")
    ),
    tag = "otp"
)]
pub async fn verify_sms(
    otp: Extension<Arc<OtpState>>,
    payload: Result<Json<SmsVerifyRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let phone = phone_target(&request.phone)?;
    verify(&otp, OtpChannel::Sms, &phone, &request.code).await
}

#[utoipa::path(
    post,
    path = "/api/otp/email/verify",
    request_body = EmailVerifyRequest,
    responses(
        (status = 200, description = "Code is valid"),
        (status = 400, description = "Invalid or expired code")
    ),
    tag = "otp"
)]
pub async fn verify_email(
    otp: Extension<Arc<OtpState>>,
    payload: Result<Json<EmailVerifyRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let email = email_target(&request.email)?;
    verify(&otp, OtpChannel::Email, &email, &request.code).await
}

async fn issue(otp: &OtpState, channel: OtpChannel, target: &str) -> Result<Response, ApiError> {
    match otp.issue(channel, target).await {
        Ok(()) => Ok(respond_empty()),
        Err(OtpError::Cooldown) => Err(ResponseCode::TooManyRequests.into()),
        Err(err @ OtpError::Delivery(_)) => Err(ApiError::internal("Failed to send code", err)),
    }
}

async fn verify(
    otp: &OtpState,
    channel: OtpChannel,
    target: &str,
    code: &str,
) -> Result<Response, ApiError> {
    if otp.verify(channel, target, code).await {
        Ok(respond_empty())
    } else {
        Err(ResponseCode::OtpInvalid.into())
    }
}

fn phone_target(raw: &str) -> Result<String, ApiError> {
    let phone = raw.trim();
    check_phone(phone).map_err(|err| ApiError::invalid(err.to_string()))?;
    Ok(phone.to_string())
}

fn email_target(raw: &str) -> Result<String, ApiError> {
    let email = normalize_email(raw);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(ApiError::invalid("Invalid email"))
    }
}
