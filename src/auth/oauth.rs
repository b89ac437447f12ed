//! External identity provider (Google) collaborator.
//!
//! The core only needs two things from the provider: an authorize URL to
//! send the browser to, and a verified email address for a returned code.
//! The `state` parameter is a random value parked in the ephemeral store for
//! ten minutes and consumed exactly once.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::{EphemeralStore, StoreError};
use crate::config::GoogleOAuthSettings;
use crate::APP_USER_AGENT;

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub email: String,
    pub email_verified: bool,
}

#[async_trait]
pub trait OAuthExchange: Send + Sync {
    fn enabled(&self) -> bool {
        true
    }

    /// # Errors
    /// Returns an error if the URL cannot be built.
    fn authorize_url(&self, state: &str) -> Result<String>;

    /// Trade an authorization code for the caller's identity.
    async fn exchange(&self, code: &str) -> Result<OAuthIdentity>;
}

/// Stand-in when no client credentials are configured.
#[derive(Clone, Debug, Default)]
pub struct DisabledOAuth;

#[async_trait]
impl OAuthExchange for DisabledOAuth {
    fn enabled(&self) -> bool {
        false
    }

    fn authorize_url(&self, _state: &str) -> Result<String> {
        bail!("oauth is not configured")
    }

    async fn exchange(&self, _code: &str) -> Result<OAuthIdentity> {
        bail!("oauth is not configured")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

pub struct GoogleOAuthClient {
    client: reqwest::Client,
    settings: GoogleOAuthSettings,
}

impl GoogleOAuthClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: GoogleOAuthSettings, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build oauth client")?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl OAuthExchange for GoogleOAuthClient {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(GOOGLE_AUTHORIZE_URL).context("invalid authorize url")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid email profile")
            .append_pair("state", state)
            .append_pair("prompt", "select_account");
        Ok(url.into())
    }

    async fn exchange(&self, code: &str) -> Result<OAuthIdentity> {
        let form = [
            ("code", code),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.expose_secret()),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let token: TokenResponse = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&form)
            .send()
            .await
            .context("token exchange request failed")?
            .error_for_status()
            .context("token exchange rejected")?
            .json()
            .await
            .context("token exchange response was not valid JSON")?;

        let info: UserInfo = self
            .client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("userinfo request failed")?
            .error_for_status()
            .context("userinfo rejected")?
            .json()
            .await
            .context("userinfo response was not valid JSON")?;

        let email = info.email.ok_or_else(|| anyhow!("provider returned no email"))?;
        Ok(OAuthIdentity {
            email,
            email_verified: info.email_verified,
        })
    }
}

/// Single-use `state` values.
#[derive(Clone)]
pub struct OAuthStates {
    store: Arc<dyn EphemeralStore>,
}

fn state_key(state: &str) -> String {
    format!("oauth_state:{state}")
}

impl OAuthStates {
    #[must_use]
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn issue(&self) -> Result<String, StoreError> {
        let mut bytes = [0_u8; 24];
        OsRng.fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);
        self.store.set(&state_key(&state), "1", STATE_TTL).await?;
        Ok(state)
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn consume(&self, state: &str) -> Result<bool, StoreError> {
        if state.is_empty() {
            return Ok(false);
        }
        Ok(self.store.take(&state_key(state)).await?.is_some())
    }
}
