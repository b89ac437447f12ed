use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use super::switch;
use crate::auth::version::ProductVersion;
use crate::config::GoogleOAuthSettings;

pub const ARG_RECAPTCHA_ENABLED: &str = "recaptcha-enabled";
pub const ARG_RECAPTCHA_SECRET: &str = "recaptcha-secret";
pub const ARG_LICENSE_CHECK_ENABLED: &str = "license-check-enabled";
pub const ARG_CURRENT_VERSION: &str = "current-version";
pub const ARG_MIN_SUPPORTED_VERSION: &str = "min-supported-version";
pub const ARG_FRONTEND_URL: &str = "frontend-url";
pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_OUTBOUND_TIMEOUT_SECONDS: &str = "outbound-timeout-seconds";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_GOOGLE_REDIRECT_URL: &str = "google-redirect-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub recaptcha_enabled: bool,
    pub recaptcha_secret: Option<SecretString>,
    pub license_check_enabled: bool,
    pub current_version: ProductVersion,
    pub min_supported_version: ProductVersion,
    pub frontend_url: String,
    pub production: bool,
    pub outbound_timeout_seconds: u64,
    pub google: Option<GoogleOAuthSettings>,
}

impl Options {
    /// Parse outbound integration, version and deployment arguments.
    ///
    /// # Errors
    /// Returns an error if a version is malformed, reCAPTCHA is enabled
    /// without a secret, or the Google credentials are only partly set.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // clap passes "" through when the env var is set but empty
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let recaptcha_enabled = matches
            .get_one::<bool>(ARG_RECAPTCHA_ENABLED)
            .copied()
            .unwrap_or(false);
        let recaptcha_secret = get_non_empty(ARG_RECAPTCHA_SECRET).map(SecretString::from);
        if recaptcha_enabled && recaptcha_secret.is_none() {
            anyhow::bail!(
                "missing required argument: --{ARG_RECAPTCHA_SECRET} (required when reCAPTCHA is enabled)"
            );
        }

        let current_version = get_non_empty(ARG_CURRENT_VERSION)
            .unwrap_or_else(|| "1.0.0".to_string())
            .parse::<ProductVersion>()
            .with_context(|| format!("invalid --{ARG_CURRENT_VERSION}"))?;
        let min_supported_version = get_non_empty(ARG_MIN_SUPPORTED_VERSION)
            .unwrap_or_else(|| "1.0.0".to_string())
            .parse::<ProductVersion>()
            .with_context(|| format!("invalid --{ARG_MIN_SUPPORTED_VERSION}"))?;

        let frontend_url = get_non_empty(ARG_FRONTEND_URL)
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        url::Url::parse(&frontend_url).with_context(|| format!("invalid --{ARG_FRONTEND_URL}"))?;

        let production = get_non_empty(ARG_ENVIRONMENT)
            .is_some_and(|env| env.eq_ignore_ascii_case("production"));

        let google = match (
            get_non_empty(ARG_GOOGLE_CLIENT_ID),
            get_non_empty(ARG_GOOGLE_CLIENT_SECRET),
            get_non_empty(ARG_GOOGLE_REDIRECT_URL),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_url)) => {
                Some(GoogleOAuthSettings {
                    client_id,
                    client_secret: SecretString::from(client_secret),
                    redirect_url,
                })
            }
            (None, None, None) => None,
            _ => anyhow::bail!(
                "--{ARG_GOOGLE_CLIENT_ID}, --{ARG_GOOGLE_CLIENT_SECRET} and --{ARG_GOOGLE_REDIRECT_URL} must be set together"
            ),
        };

        Ok(Self {
            recaptcha_enabled,
            recaptcha_secret,
            license_check_enabled: matches
                .get_one::<bool>(ARG_LICENSE_CHECK_ENABLED)
                .copied()
                .unwrap_or(false),
            current_version,
            min_supported_version,
            frontend_url,
            production,
            outbound_timeout_seconds: matches
                .get_one::<u64>(ARG_OUTBOUND_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
            google,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            switch(ARG_RECAPTCHA_ENABLED, "CUSTODIA_RECAPTCHA_ENABLED", "false")
                .help("Require a reCAPTCHA response on password logins"),
        )
        .arg(
            Arg::new(ARG_RECAPTCHA_SECRET)
                .long(ARG_RECAPTCHA_SECRET)
                .help("reCAPTCHA server-side secret")
                .env("CUSTODIA_RECAPTCHA_SECRET")
                .hide_env_values(true),
        )
        .arg(
            switch(
                ARG_LICENSE_CHECK_ENABLED,
                "CUSTODIA_LICENSE_CHECK_ENABLED",
                "false",
            )
            .help("Refuse logins for principals without a valid license key"),
        )
        .arg(
            Arg::new(ARG_CURRENT_VERSION)
                .long(ARG_CURRENT_VERSION)
                .help("Product version embedded in newly issued tokens")
                .env("CUSTODIA_CURRENT_VERSION")
                .default_value("1.0.0"),
        )
        .arg(
            Arg::new(ARG_MIN_SUPPORTED_VERSION)
                .long(ARG_MIN_SUPPORTED_VERSION)
                .help("Tokens issued below this version must re-authenticate")
                .env("CUSTODIA_MIN_SUPPORTED_VERSION")
                .default_value("1.0.0"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend base URL used for OAuth redirects")
                .env("CUSTODIA_FRONTEND_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment; `production` enables HSTS")
                .env("CUSTODIA_ENVIRONMENT")
                .default_value("development"),
        )
        .arg(
            Arg::new(ARG_OUTBOUND_TIMEOUT_SECONDS)
                .long(ARG_OUTBOUND_TIMEOUT_SECONDS)
                .help("Timeout for reCAPTCHA and OAuth calls (clamped to 5-30 seconds)")
                .env("CUSTODIA_OUTBOUND_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id")
                .env("CUSTODIA_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("CUSTODIA_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_GOOGLE_REDIRECT_URL)
                .long(ARG_GOOGLE_REDIRECT_URL)
                .help("Redirect URL registered with Google")
                .env("CUSTODIA_GOOGLE_REDIRECT_URL"),
        )
}
