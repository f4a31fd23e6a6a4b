//! # IDecs (identity and account management)
//!
//! `idecs` serves account signup, password and one-time-code login, session
//! ticketing and profile management over an HTTP API.
//!
//! ## Credentials
//!
//! A single fixed-parameter scrypt derivation (`N=16384, r=8, p=1, dkLen=64`,
//! hex encoded) backs two things:
//!
//! - **Stored passwords:** `scrypt$<salt>$<key>` with a random 16-byte salt.
//! - **Request signing:** every `/api` call carries a `timestamp` header (Unix
//!   milliseconds) and an `api-key` header derived from that timestamp and the
//!   request path.
//!
//! ## Login flow
//!
//! A successful login returns a short-lived, single-use **ticket**. Exchanging
//! the ticket at `/api/user/ticket/validate` yields the session **token**, also
//! set as the `token` cookie. Only SHA-256 hashes of tokens are stored.

pub mod api;
pub mod cli;
pub mod crypto;
pub mod otp;
pub mod storage;
pub mod validation;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
