//! Delivery of one-time codes.
//!
//! The default sender for local dev is `LogOtpSender`, which logs and returns
//! `Ok(())`. `WebhookOtpSender` hands the code to an SMS/email gateway over HTTP.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use super::OtpChannel;

#[derive(Clone, Debug, Serialize)]
pub struct OtpMessage {
    pub channel: OtpChannel,
    pub target: String,
    pub code: String,
}

/// One-time code delivery abstraction.
#[async_trait]
pub trait OtpSender: Send + Sync {
    /// Deliver the code or return an error so the caller can discard it.
    async fn send(&self, message: &OtpMessage) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogOtpSender;

#[async_trait]
impl OtpSender for LogOtpSender {
    async fn send(&self, message: &OtpMessage) -> Result<()> {
        info!(
            channel = %message.channel,
            target = %message.target,
            "otp send stub"
        );
        debug!(code = %message.code, "otp code");
        Ok(())
    }
}

/// POSTs `{channel, target, code}` as JSON to a gateway URL.
#[derive(Clone, Debug)]
pub struct WebhookOtpSender {
    url: String,
    client: Client,
}

impl WebhookOtpSender {
    /// # Errors
    /// Returns an error if the URL is not http(s) or the HTTP client cannot be
    /// built.
    pub fn new(url: String) -> Result<Self> {
        let parsed =
            Url::parse(&url).with_context(|| format!("Invalid OTP webhook URL: {url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("OTP webhook URL must be http(s): {url}"));
        }
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("Failed to build OTP webhook client")?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl OtpSender for WebhookOtpSender {
    async fn send(&self, message: &OtpMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .with_context(|| format!("OTP webhook request failed: {}", self.url))?;

        if !response.status().is_success() {
            return Err(anyhow!("{} - {}", self.url, response.status()));
        }

        debug!(channel = %message.channel, "otp delivered via webhook");
        Ok(())
    }
}
