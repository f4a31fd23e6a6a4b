//! API handlers for IDecs.
//!
//! `/api/user/*` and `/api/otp/*` carry the account flows, `/api/nav` the
//! navigation tree. Every handler answers with the envelope from
//! [`crate::api::error`], except `/` and `/health`.

pub mod auth;
pub mod health;
pub mod nav;
pub mod otp;
pub mod root;
pub mod users;
