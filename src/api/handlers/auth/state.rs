//! Auth configuration and the in-memory login ticket store.

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::crypto::{generate_token, hash_token};
use crate::validation::PasswordPolicy;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_TICKET_TTL_SECONDS: u64 = 60;
const DEFAULT_SIGNATURE_WINDOW_SECONDS: i64 = 5 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    ticket_ttl_seconds: u64,
    api_secret: SecretString,
    request_signing: bool,
    signature_window_seconds: i64,
    password_policy: PasswordPolicy,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            ticket_ttl_seconds: DEFAULT_TICKET_TTL_SECONDS,
            api_secret: SecretString::from(String::new()),
            request_signing: true,
            signature_window_seconds: DEFAULT_SIGNATURE_WINDOW_SECONDS,
            password_policy: PasswordPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_ticket_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ticket_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_api_secret(mut self, secret: SecretString) -> Self {
        self.api_secret = secret;
        self
    }

    #[must_use]
    pub fn with_request_signing(mut self, enabled: bool) -> Self {
        self.request_signing = enabled;
        self
    }

    #[must_use]
    pub fn with_signature_window_seconds(mut self, seconds: i64) -> Self {
        self.signature_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn ticket_ttl_seconds(&self) -> u64 {
        self.ticket_ttl_seconds
    }

    pub(crate) fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }

    #[must_use]
    pub fn request_signing(&self) -> bool {
        self.request_signing
    }

    #[must_use]
    pub fn signature_window_seconds(&self) -> i64 {
        self.signature_window_seconds
    }

    #[must_use]
    pub fn password_policy(&self) -> &PasswordPolicy {
        &self.password_policy
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

struct TicketEntry {
    user_id: i64,
    issued_at: Instant,
}

/// Single-use login tickets, keyed by the SHA-256 of the ticket.
pub struct TicketStore {
    ttl: Duration,
    tickets: Mutex<HashMap<Vec<u8>, TicketEntry>>,
}

impl TicketStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a ticket for `user_id`, dropping expired ones on the way.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub async fn issue(&self, user_id: i64) -> Result<String> {
        let ticket = generate_token()?;
        let mut tickets = self.tickets.lock().await;
        tickets.retain(|_, entry| entry.issued_at.elapsed() < self.ttl);
        tickets.insert(
            hash_token(&ticket),
            TicketEntry {
                user_id,
                issued_at: Instant::now(),
            },
        );
        Ok(ticket)
    }

    /// Redeem a ticket. Unknown, expired and already used tickets yield `None`.
    pub async fn take(&self, ticket: &str) -> Option<i64> {
        let mut tickets = self.tickets.lock().await;
        let entry = tickets.remove(&hash_token(ticket))?;
        (entry.issued_at.elapsed() < self.ttl).then_some(entry.user_id)
    }
}

pub struct AuthState {
    config: AuthConfig,
    tickets: TicketStore,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let tickets = TicketStore::new(Duration::from_secs(config.ticket_ttl_seconds()));
        Self { config, tickets }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn tickets(&self) -> &TicketStore {
        &self.tickets
    }
}
