//! Auth handlers and supporting modules.
//!
//! ## Login Flow
//!
//! 1. `POST /api/user/login` checks a password or one-time code and answers
//!    with a **ticket**: random, single use, valid for 60 seconds by default.
//! 2. `GET /api/user/ticket/validate?ticket=...` redeems the ticket for a
//!    session **token**, returned in the body and set as the `token` cookie.
//! 3. Authenticated routes accept the token from the cookie or an
//!    `Authorization: Bearer` header.
//!
//! Tickets live in process memory; sessions are persisted through
//! [`crate::storage::Storage`] as SHA-256 hashes.

pub(crate) mod login;
pub(crate) mod principal;
pub(crate) mod session;
pub(crate) mod signup;
mod state;
pub(crate) mod ticket;
pub(crate) mod types;

pub use state::{AuthConfig, AuthState, TicketStore};
