use crate::{
    api::{self, handlers::auth::AuthConfig},
    cli::telemetry,
    otp::{LogOtpSender, OtpConfig, OtpSender, OtpState, WebhookOtpSender},
    storage::{DynStorage, MemoryStorage, PgStorage},
    validation::PasswordPolicy,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub enum StorageBackend {
    Memory,
    Postgres(SecretString),
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub storage: StorageBackend,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub ticket_ttl_seconds: u64,
    pub api_secret: Option<SecretString>,
    pub request_signing: bool,
    pub signature_window_seconds: i64,
    pub password_min_length: usize,
    pub password_max_length: usize,
    pub otp_ttl_seconds: u64,
    pub otp_resend_cooldown_seconds: u64,
    pub otp_max_attempts: u32,
    pub otp_fixed_code: Option<String>,
    pub otp_webhook_url: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the schema cannot be
/// applied, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let storage = connect_storage(&args.storage).await?;
    let auth_config = auth_config(&args);
    let otp_state = Arc::new(OtpState::new(otp_config(&args), otp_sender(&args)?));

    let result = api::new(args.port, storage, auth_config, otp_state).await;
    telemetry::shutdown_tracer();
    result
}

async fn connect_storage(backend: &StorageBackend) -> Result<DynStorage> {
    match backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on shutdown");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageBackend::Postgres(dsn) => {
            let storage = PgStorage::connect(dsn.expose_secret())
                .await
                .context("Failed to connect to database")?;
            storage
                .apply_schema()
                .await
                .context("Failed to apply database schema")?;
            info!("Database schema applied");
            Ok(Arc::new(storage))
        }
    }
}

fn auth_config(args: &Args) -> AuthConfig {
    let mut config = AuthConfig::new(args.frontend_base_url.clone())
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_ticket_ttl_seconds(args.ticket_ttl_seconds)
        .with_request_signing(args.request_signing)
        .with_signature_window_seconds(args.signature_window_seconds)
        .with_password_policy(PasswordPolicy::new(
            args.password_min_length,
            args.password_max_length,
        ));
    if let Some(secret) = &args.api_secret {
        config = config.with_api_secret(secret.clone());
    }
    if !args.request_signing {
        warn!("Request signing disabled; /api accepts unsigned requests");
    }
    config
}

fn otp_config(args: &Args) -> OtpConfig {
    if args.otp_fixed_code.is_some() {
        warn!("Fixed one-time code configured; every target accepts it");
    }
    OtpConfig::new()
        .with_ttl_seconds(args.otp_ttl_seconds)
        .with_resend_cooldown_seconds(args.otp_resend_cooldown_seconds)
        .with_max_attempts(args.otp_max_attempts)
        .with_fixed_code(args.otp_fixed_code.clone())
}

fn otp_sender(args: &Args) -> Result<Arc<dyn OtpSender>> {
    match &args.otp_webhook_url {
        Some(url) => {
            let sender = WebhookOtpSender::new(url.clone())?;
            Ok(Arc::new(sender))
        }
        None => Ok(Arc::new(LogOtpSender)),
    }
}
