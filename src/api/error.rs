//! Response envelope and API error codes.
//!
//! Every `/api` response, success or failure, is wrapped as
//! `{"head": {"code", "message"}, "data"}`. `head.code` is `0` on success and a
//! [`ResponseCode`] otherwise; the HTTP status is derived from the code.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResponseCode {
    Ok = 0,
    InvalidParams = 40000,
    OtpInvalid = 40001,
    PasswordPolicy = 40002,
    PasswordMismatch = 40003,
    Unauthorized = 40100,
    SignatureInvalid = 40101,
    TimestampExpired = 40102,
    TicketInvalid = 40103,
    CredentialsInvalid = 40104,
    NotFound = 40400,
    UserExists = 40900,
    TooManyRequests = 42900,
    Internal = 50000,
}

impl ResponseCode {
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::InvalidParams
            | Self::OtpInvalid
            | Self::PasswordPolicy
            | Self::PasswordMismatch => StatusCode::BAD_REQUEST,
            Self::Unauthorized
            | Self::SignatureInvalid
            | Self::TimestampExpired
            | Self::TicketInvalid
            | Self::CredentialsInvalid => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::UserExists => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidParams => "Invalid parameters",
            Self::OtpInvalid => "Invalid or expired code",
            Self::PasswordPolicy => "Password does not meet the policy",
            Self::PasswordMismatch => "Passwords do not match",
            Self::Unauthorized => "Authentication required",
            Self::SignatureInvalid => "Invalid request signature",
            Self::TimestampExpired => "Request timestamp outside the allowed window",
            Self::TicketInvalid => "Invalid or expired ticket",
            Self::CredentialsInvalid => "Invalid credentials",
            Self::NotFound => "Not found",
            Self::UserExists => "User already exists",
            Self::TooManyRequests => "Too many requests",
            Self::Internal => "Internal server error",
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub code: i32,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Envelope<T> {
    pub head: Head,
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            head: Head {
                code: ResponseCode::Ok.code(),
                message: ResponseCode::Ok.default_message().to_string(),
            },
            data: Some(data),
        }
    }
}

/// Wrap `data` in a success envelope with the given status.
pub fn respond<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(Envelope::ok(data))).into_response()
}

/// `200 OK` with `data: null`.
pub fn respond_empty() -> Response {
    respond(StatusCode::OK, ())
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ResponseCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn from_code(code: ResponseCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::InvalidParams, message)
    }

    /// Log the cause and return a generic internal error.
    pub fn internal(context: &str, err: impl Display) -> Self {
        error!("{context}: {err}");
        Self::from_code(ResponseCode::Internal)
    }
}

impl From<ResponseCode> for ApiError {
    fn from(code: ResponseCode) -> Self {
        Self::from_code(code)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: Envelope<()> = Envelope {
            head: Head {
                code: self.code.code(),
                message: self.message,
            },
            data: None,
        };
        (self.code.http_status(), Json(body)).into_response()
    }
}
