//! One-time codes sent by SMS or email.
//!
//! Codes are six digits, stored hashed in memory keyed by `channel:target`,
//! expire after a TTL and are discarded after too many wrong guesses. Signup and
//! OTP login consume a code; the standalone verify endpoints only check it.

mod sender;

pub use sender::{LogOtpSender, OtpMessage, OtpSender, WebhookOtpSender};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::crypto::hash_token;

const DEFAULT_OTP_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const CODE_DIGITS: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpChannel {
    Sms,
    Email,
}

impl fmt::Display for OtpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sms => f.write_str("sms"),
            Self::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("a code was sent recently, retry later")]
    Cooldown,
    #[error("failed to deliver code")]
    Delivery(#[source] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct OtpConfig {
    ttl: Duration,
    resend_cooldown: Duration,
    max_attempts: u32,
    fixed_code: Option<String>,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_OTP_TTL_SECONDS),
            resend_cooldown: Duration::from_secs(DEFAULT_RESEND_COOLDOWN_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            fixed_code: None,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.resend_cooldown = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// A code accepted for every target, for test environments.
    #[must_use]
    pub fn with_fixed_code(mut self, code: Option<String>) -> Self {
        self.fixed_code = code.filter(|code| !code.trim().is_empty());
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        self.resend_cooldown
    }
}

struct OtpEntry {
    code_hash: Vec<u8>,
    issued_at: Instant,
    attempts: u32,
}

pub struct OtpState {
    config: OtpConfig,
    sender: Arc<dyn OtpSender>,
    codes: Mutex<HashMap<String, OtpEntry>>,
}

impl OtpState {
    pub fn new(config: OtpConfig, sender: Arc<dyn OtpSender>) -> Self {
        Self {
            config,
            sender,
            codes: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Generate, store and deliver a fresh code for `target`.
    ///
    /// # Errors
    /// `Cooldown` if a code was issued within the resend window, `Delivery` if
    /// the sender failed (the code is then discarded).
    pub async fn issue(&self, channel: OtpChannel, target: &str) -> Result<(), OtpError> {
        let key = entry_key(channel, target);
        let code = generate_code();

        {
            let mut codes = self.codes.lock().await;
            codes.retain(|_, entry| entry.issued_at.elapsed() < self.config.ttl);
            if let Some(existing) = codes.get(&key) {
                if existing.issued_at.elapsed() < self.config.resend_cooldown {
                    return Err(OtpError::Cooldown);
                }
            }
            codes.insert(
                key.clone(),
                OtpEntry {
                    code_hash: hash_token(&code),
                    issued_at: Instant::now(),
                    attempts: 0,
                },
            );
        }

        let message = OtpMessage {
            channel,
            target: target.to_string(),
            code,
        };
        if let Err(err) = self.sender.send(&message).await {
            warn!(%channel, error = %err, "otp delivery failed");
            self.codes.lock().await.remove(&key);
            return Err(OtpError::Delivery(err));
        }

        debug!(%channel, "otp issued");
        Ok(())
    }

    /// Check a code without consuming it.
    pub async fn verify(&self, channel: OtpChannel, target: &str, code: &str) -> bool {
        self.check(channel, target, code, false).await
    }

    /// Check a code and, on success, remove it so it cannot be reused.
    pub async fn consume(&self, channel: OtpChannel, target: &str, code: &str) -> bool {
        self.check(channel, target, code, true).await
    }

    async fn check(&self, channel: OtpChannel, target: &str, code: &str, consume: bool) -> bool {
        let code = code.trim();
        if code.is_empty() {
            return false;
        }

        if let Some(fixed) = &self.config.fixed_code {
            if bool::from(fixed.as_bytes().ct_eq(code.as_bytes())) {
                return true;
            }
        }

        let key = entry_key(channel, target);
        let mut codes = self.codes.lock().await;
        let Some(entry) = codes.get_mut(&key) else {
            return false;
        };

        if entry.issued_at.elapsed() >= self.config.ttl {
            codes.remove(&key);
            return false;
        }

        if bool::from(entry.code_hash.ct_eq(&hash_token(code))) {
            if consume {
                codes.remove(&key);
            }
            return true;
        }

        entry.attempts += 1;
        if entry.attempts >= self.config.max_attempts {
            codes.remove(&key);
        }
        false
    }
}

fn entry_key(channel: OtpChannel, target: &str) -> String {
    format!("{channel}:{target}")
}

fn generate_code() -> String {
    let upper = 10u32.pow(CODE_DIGITS);
    let value = rand::thread_rng().gen_range(0..upper);
    format!("{value:0width$}", width = CODE_DIGITS as usize)
}
