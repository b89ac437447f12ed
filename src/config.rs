//! Admission configuration.
//!
//! Built once at startup from CLI/env arguments and shared read-only.

use secrecy::SecretString;
use std::net::IpAddr;
use std::time::Duration;

use crate::auth::version::ProductVersion;

const DEFAULT_ACCESS_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_SESSION_TIMEOUT_SECONDS: u64 = 60 * 60;
const DEFAULT_IP_LOGIN_LIMIT: u64 = 10;
const DEFAULT_IDENTITY_FAILURE_LIMIT: u64 = 5;
const DEFAULT_LOCKOUT_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_IP_LIMIT: u64 = 100;
const DEFAULT_MFA_CODE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_MFA_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_OUTBOUND_TIMEOUT_SECONDS: u64 = 10;
const MIN_OUTBOUND_TIMEOUT_SECONDS: u64 = 5;
const MAX_OUTBOUND_TIMEOUT_SECONDS: u64 = 30;

/// Credentials for the Google authorization-code flow.
#[derive(Clone, Debug)]
pub struct GoogleOAuthSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_url: String,
}

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    jwt_secret: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
    session_timeout: Duration,
    ip_login_limit: u64,
    identity_failure_limit: u64,
    lockout_duration: Duration,
    refresh_ip_limit: u64,
    mfa_enabled: bool,
    mfa_code_ttl: Duration,
    mfa_max_attempts: u32,
    recaptcha_enabled: bool,
    recaptcha_secret: Option<SecretString>,
    license_check_enabled: bool,
    current_version: ProductVersion,
    min_supported_version: ProductVersion,
    frontend_url: String,
    production: bool,
    single_session: bool,
    tenant_header_fallback: bool,
    outbound_timeout: Duration,
    google: Option<GoogleOAuthSettings>,
    trusted_proxies: Vec<IpAddr>,
}

impl AdmissionConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString, frontend_url: String) -> Self {
        Self {
            jwt_secret,
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECONDS),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECONDS),
            ip_login_limit: DEFAULT_IP_LOGIN_LIMIT,
            identity_failure_limit: DEFAULT_IDENTITY_FAILURE_LIMIT,
            lockout_duration: Duration::from_secs(DEFAULT_LOCKOUT_SECONDS),
            refresh_ip_limit: DEFAULT_REFRESH_IP_LIMIT,
            mfa_enabled: false,
            mfa_code_ttl: Duration::from_secs(DEFAULT_MFA_CODE_TTL_SECONDS),
            mfa_max_attempts: DEFAULT_MFA_MAX_ATTEMPTS,
            recaptcha_enabled: false,
            recaptcha_secret: None,
            license_check_enabled: false,
            current_version: ProductVersion::new(vec![1, 0, 0]),
            min_supported_version: ProductVersion::new(vec![1, 0, 0]),
            frontend_url,
            production: false,
            single_session: true,
            tenant_header_fallback: false,
            outbound_timeout: Duration::from_secs(DEFAULT_OUTBOUND_TIMEOUT_SECONDS),
            google: None,
            trusted_proxies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_session_timeout_seconds(mut self, seconds: u64) -> Self {
        self.session_timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_ip_login_limit(mut self, limit: u64) -> Self {
        self.ip_login_limit = limit;
        self
    }

    #[must_use]
    pub fn with_identity_failure_limit(mut self, limit: u64) -> Self {
        self.identity_failure_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: u64) -> Self {
        self.lockout_duration = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_ip_limit(mut self, limit: u64) -> Self {
        self.refresh_ip_limit = limit;
        self
    }

    #[must_use]
    pub fn with_mfa(mut self, enabled: bool) -> Self {
        self.mfa_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_mfa_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.mfa_code_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_mfa_max_attempts(mut self, attempts: u32) -> Self {
        self.mfa_max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_recaptcha(mut self, enabled: bool, secret: Option<SecretString>) -> Self {
        self.recaptcha_enabled = enabled;
        self.recaptcha_secret = secret;
        self
    }

    #[must_use]
    pub fn with_license_check(mut self, enabled: bool) -> Self {
        self.license_check_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_versions(mut self, current: ProductVersion, min_supported: ProductVersion) -> Self {
        self.current_version = current;
        self.min_supported_version = min_supported;
        self
    }

    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn with_single_session(mut self, enabled: bool) -> Self {
        self.single_session = enabled;
        self
    }

    #[must_use]
    pub fn with_tenant_header_fallback(mut self, enabled: bool) -> Self {
        self.tenant_header_fallback = enabled;
        self
    }

    /// Clamped to the 5-30 second range.
    #[must_use]
    pub fn with_outbound_timeout_seconds(mut self, seconds: u64) -> Self {
        self.outbound_timeout = Duration::from_secs(
            seconds.clamp(MIN_OUTBOUND_TIMEOUT_SECONDS, MAX_OUTBOUND_TIMEOUT_SECONDS),
        );
        self
    }

    #[must_use]
    pub fn with_google(mut self, google: Option<GoogleOAuthSettings>) -> Self {
        self.google = google;
        self
    }

    /// Peers whose `X-Forwarded-For` is believed. Empty means the socket
    /// address is always the client.
    #[must_use]
    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    #[must_use]
    pub fn ip_login_limit(&self) -> u64 {
        self.ip_login_limit
    }

    #[must_use]
    pub fn identity_failure_limit(&self) -> u64 {
        self.identity_failure_limit
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn refresh_ip_limit(&self) -> u64 {
        self.refresh_ip_limit
    }

    #[must_use]
    pub fn mfa_enabled(&self) -> bool {
        self.mfa_enabled
    }

    #[must_use]
    pub fn mfa_code_ttl(&self) -> Duration {
        self.mfa_code_ttl
    }

    #[must_use]
    pub fn mfa_max_attempts(&self) -> u32 {
        self.mfa_max_attempts
    }

    #[must_use]
    pub fn recaptcha_enabled(&self) -> bool {
        self.recaptcha_enabled
    }

    #[must_use]
    pub fn recaptcha_secret(&self) -> Option<&SecretString> {
        self.recaptcha_secret.as_ref()
    }

    #[must_use]
    pub fn license_check_enabled(&self) -> bool {
        self.license_check_enabled
    }

    #[must_use]
    pub fn current_version(&self) -> &ProductVersion {
        &self.current_version
    }

    #[must_use]
    pub fn min_supported_version(&self) -> &ProductVersion {
        &self.min_supported_version
    }

    #[must_use]
    pub fn frontend_url(&self) -> &str {
        &self.frontend_url
    }

    #[must_use]
    pub fn production(&self) -> bool {
        self.production
    }

    #[must_use]
    pub fn single_session(&self) -> bool {
        self.single_session
    }

    #[must_use]
    pub fn tenant_header_fallback(&self) -> bool {
        self.tenant_header_fallback
    }

    #[must_use]
    pub fn outbound_timeout(&self) -> Duration {
        self.outbound_timeout
    }

    #[must_use]
    pub fn google(&self) -> Option<&GoogleOAuthSettings> {
        self.google.as_ref()
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    /// Cookies carry `Secure` only when the frontend is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.frontend_url.starts_with("https://")
    }
}
