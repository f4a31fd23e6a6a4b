//! scrypt key derivation shared by password storage and request signing.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use scrypt::{Params, scrypt};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// `N = 2^14 = 16384`
pub const SCRYPT_LOG_N: u8 = 14;
pub const SCRYPT_R: u32 = 8;
pub const SCRYPT_P: u32 = 1;
/// Derived key length in bytes; the hex form is twice as long.
pub const DERIVED_KEY_LEN: usize = 64;

const SALT_LEN: usize = 16;
const HASH_SCHEME: &str = "scrypt";

/// Derive a 64-byte scrypt key and return it hex encoded (128 lowercase chars).
///
/// # Errors
/// Returns an error if scrypt rejects the parameters or output length.
pub fn derive_key(password: &[u8], salt: &[u8]) -> Result<String> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, DERIVED_KEY_LEN)
        .map_err(|err| anyhow!("invalid scrypt parameters: {err}"))?;
    let mut output = [0u8; DERIVED_KEY_LEN];
    scrypt(password, salt, &params, &mut output)
        .map_err(|err| anyhow!("scrypt derivation failed: {err}"))?;
    Ok(hex::encode(output))
}

/// Run [`derive_key`] on the blocking pool.
///
/// # Errors
/// Returns an error if the derivation fails or the blocking task panics.
pub async fn derive_key_async(password: Vec<u8>, salt: Vec<u8>) -> Result<String> {
    blocking(move || derive_key(&password, &salt)).await
}

/// Hash a password for storage as `scrypt$<salt-hex>$<key-hex>`.
///
/// # Errors
/// Returns an error if the system RNG or the derivation fails.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate password salt")?;
    let key = derive_key(password.as_bytes(), &salt)?;
    Ok(format!("{HASH_SCHEME}${}${key}", hex::encode(salt)))
}

/// Check a password against a value produced by [`hash_password`].
///
/// # Errors
/// Returns an error if the stored value is malformed.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt_hex), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(anyhow!("malformed password hash"));
    };
    if scheme != HASH_SCHEME {
        return Err(anyhow!("unsupported password hash scheme: {scheme}"));
    }
    let salt = hex::decode(salt_hex).context("malformed password hash salt")?;
    let derived = derive_key(password.as_bytes(), &salt)?;
    Ok(derived.as_bytes().ct_eq(expected.as_bytes()).into())
}

/// # Errors
/// Same as [`hash_password`].
pub async fn hash_password_async(password: String) -> Result<String> {
    blocking(move || hash_password(&password)).await
}

/// # Errors
/// Same as [`verify_password`].
pub async fn verify_password_async(password: String, stored: String) -> Result<bool> {
    blocking(move || verify_password(&password, &stored)).await
}

/// Compute the `api-key` header for a request.
///
/// The timestamp (decimal milliseconds) is the scrypt password, the request
/// path followed by the shared secret is the salt. An empty secret yields the
/// plain `derive(timestamp, path)` form.
///
/// # Errors
/// Returns an error if the derivation fails.
pub fn generate_api_key(timestamp_ms: i64, path: &str, secret: &str) -> Result<String> {
    let salt = format!("{path}{secret}");
    derive_key(timestamp_ms.to_string().as_bytes(), salt.as_bytes())
}

/// Compare a presented `api-key` header against the expected derivation.
///
/// # Errors
/// Returns an error if the derivation fails.
pub fn verify_api_key(api_key: &str, timestamp_ms: i64, path: &str, secret: &str) -> Result<bool> {
    let expected = generate_api_key(timestamp_ms, path, secret)?;
    let presented = api_key.trim().to_ascii_lowercase();
    Ok(presented.as_bytes().ct_eq(expected.as_bytes()).into())
}

/// Run [`verify_api_key`] on the blocking pool.
///
/// # Errors
/// Same as [`verify_api_key`].
pub async fn verify_api_key_async(
    api_key: String,
    timestamp_ms: i64,
    path: String,
    secret: String,
) -> Result<bool> {
    blocking(move || verify_api_key(&api_key, timestamp_ms, &path, &secret)).await
}

/// Random 32-byte token, URL-safe base64 without padding.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// SHA-256 of a token; the raw value is never persisted.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("key derivation task failed")?
}
