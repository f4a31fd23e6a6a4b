//! Input checks for identities, usernames and the password policy.

use regex::Regex;
use thiserror::Error;

pub const MAX_EMAIL_LEN: usize = 128;
pub const MAX_PHONE_LEN: usize = 16;
pub const MAX_USERNAME_LEN: usize = 64;

const DEFAULT_PASSWORD_MIN_LEN: usize = 8;
const DEFAULT_PASSWORD_MAX_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("password is required")]
    Empty,
    #[error("password must be {min}-{max} characters long")]
    Length { min: usize, max: usize },
    #[error("password must contain an uppercase letter")]
    MissingUppercase,
    #[error("password must contain a lowercase letter")]
    MissingLowercase,
    #[error("password must contain a digit")]
    MissingDigit,
    #[error("password must contain a special character")]
    MissingSpecial,
    #[error("password must not contain line breaks or control characters")]
    ControlCharacter,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number is required")]
    Empty,
    #[error("phone number must contain digits only")]
    Invalid,
    #[error("phone number is too long")]
    TooLong,
}

/// Length bounds are counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    min_len: usize,
    max_len: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_PASSWORD_MIN_LEN,
            max_len: DEFAULT_PASSWORD_MAX_LEN,
        }
    }
}

impl PasswordPolicy {
    #[must_use]
    pub fn new(min_len: usize, max_len: usize) -> Self {
        let min_len = min_len.max(1);
        Self {
            min_len,
            max_len: max_len.max(min_len),
        }
    }

    #[must_use]
    pub fn min_len(&self) -> usize {
        self.min_len
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Require upper and lower case ASCII letters, a digit and a special
    /// character (anything outside `[A-Za-z0-9]`, `_` included). Control
    /// characters, line breaks among them, are refused.
    ///
    /// # Errors
    /// Returns the first rule the password breaks.
    pub fn check(&self, password: &str) -> Result<(), PasswordError> {
        if password.is_empty() {
            return Err(PasswordError::Empty);
        }

        let len = password.chars().count();
        if len < self.min_len || len > self.max_len {
            return Err(PasswordError::Length {
                min: self.min_len,
                max: self.max_len,
            });
        }

        if password.chars().any(char::is_control) {
            return Err(PasswordError::ControlCharacter);
        }

        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(PasswordError::MissingUppercase);
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(PasswordError::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordError::MissingDigit);
        }
        if !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
            return Err(PasswordError::MissingSpecial);
        }

        Ok(())
    }
}

/// Optional leading `+` (dial code) followed by ASCII digits.
///
/// # Errors
/// Returns why the phone number was rejected.
pub fn check_phone(phone: &str) -> Result<(), PhoneError> {
    if phone.is_empty() {
        return Err(PhoneError::Empty);
    }
    if !Regex::new(r"^\+?[0-9]+$").is_ok_and(|re| re.is_match(phone)) {
        return Err(PhoneError::Invalid);
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(PhoneError::TooLong);
    }
    Ok(())
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN
        && Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

#[must_use]
pub fn valid_username(username: &str) -> bool {
    let trimmed = username.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= MAX_USERNAME_LEN
}

/// A login identity: either an email address or a phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Email(String),
    Phone(String),
}

impl Identity {
    /// Classify and normalize a raw identity. Anything containing `@` is
    /// treated as an email.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.contains('@') {
            let email = normalize_email(trimmed);
            return valid_email(&email).then_some(Self::Email(email));
        }
        check_phone(trimmed)
            .ok()
            .map(|()| Self::Phone(trimmed.to_string()))
    }

    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Email(value) | Self::Phone(value) => value,
        }
    }
}
