//! reCAPTCHA verification.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::APP_USER_AGENT;

pub const SITEVERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// `Ok(false)` for a rejected token; `Err` when the provider could not answer.
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool>;
}

/// Used when captcha is disabled.
#[derive(Clone, Debug, Default)]
pub struct NoopCaptchaVerifier;

#[async_trait]
impl CaptchaVerifier for NoopCaptchaVerifier {
    async fn verify(&self, _token: &str, _remote_ip: Option<&str>) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct RecaptchaVerifier {
    client: reqwest::Client,
    secret: SecretString,
    endpoint: String,
}

impl RecaptchaVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(secret: SecretString, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build captcha client")?;
        Ok(Self {
            client,
            secret,
            endpoint: SITEVERIFY_URL.to_string(),
        })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool> {
        let mut form = vec![
            ("secret", self.secret.expose_secret().to_string()),
            ("response", token.to_string()),
        ];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip.to_string()));
        }
        let response: SiteverifyResponse = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .context("captcha request failed")?
            .error_for_status()
            .context("captcha provider returned an error status")?
            .json()
            .await
            .context("captcha response was not valid JSON")?;
        if !response.success {
            debug!(errors = ?response.error_codes, "captcha rejected");
        }
        Ok(response.success)
    }
}

/// Provider failures count as a rejection.
pub async fn passes(verifier: &dyn CaptchaVerifier, token: &str, remote_ip: Option<&str>) -> bool {
    match verifier.verify(token, remote_ip).await {
        Ok(ok) => ok,
        Err(err) => {
            warn!("captcha verification unavailable: {err:#}");
            false
        }
    }
}
