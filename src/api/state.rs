//! Shared request state.
//!
//! [`Backends`] names every storage and outbound collaborator; [`AppState`]
//! wires them into the admission components once at startup.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::abuse::{AbuseController, AbusePolicy};
use crate::auth::captcha::{CaptchaVerifier, NoopCaptchaVerifier, RecaptchaVerifier};
use crate::auth::license::{KeyFormatLicenseValidator, LicenseValidator};
use crate::auth::login::{LoginFlow, LoginSettings};
use crate::auth::mfa::{ChallengeStore, MemoryChallengeStore, MfaEngine, MfaSettings, PgChallengeStore};
use crate::auth::notify::{LogNotifier, Notifier, OutboxNotifier};
use crate::auth::oauth::{DisabledOAuth, GoogleOAuthClient, OAuthExchange, OAuthStates};
use crate::auth::session::SessionRegistry;
use crate::auth::token::{RefreshEngine, TokenIssuer, TokenKeys, TokenSettings, TokenVerifier};
use crate::auth::version::{PgVersionSource, StaticVersionSource, VersionInfo, VersionSource};
use crate::cache::{EphemeralStore, MemoryStore, PgEphemeralStore};
use crate::clock::Clock;
use crate::config::AdmissionConfig;
use crate::identity::{MemoryPrincipalStore, PgPrincipalStore, PrincipalStore};
use crate::tenant::{MemoryTenantTable, PgRecordTable, TenantRecord, TenantResolver, TenantTable};

/// Storage and outbound collaborators.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn EphemeralStore>,
    pub principals: Arc<dyn PrincipalStore>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub versions: Arc<dyn VersionSource>,
    pub notifier: Arc<dyn Notifier>,
    pub records: Arc<dyn TenantTable<TenantRecord>>,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub license: Arc<dyn LicenseValidator>,
    pub oauth: Arc<dyn OAuthExchange>,
    pub clock: Arc<dyn Clock>,
    pub pool: Option<PgPool>,
}

fn configured_versions(config: &AdmissionConfig) -> Result<VersionInfo> {
    VersionInfo::new(
        config.current_version().clone(),
        config.min_supported_version().clone(),
    )
    .context("invalid version configuration")
}

impl Backends {
    /// Everything in process memory. Outbound collaborators are inert.
    ///
    /// # Errors
    /// Returns an error if the configured versions are inconsistent.
    pub fn in_memory(config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            store: Arc::new(MemoryStore::new(clock.clone())),
            principals: Arc::new(MemoryPrincipalStore::new()),
            challenges: Arc::new(MemoryChallengeStore::new()),
            versions: Arc::new(StaticVersionSource::new(configured_versions(config)?)),
            notifier: Arc::new(LogNotifier),
            records: Arc::new(MemoryTenantTable::new()),
            captcha: Arc::new(NoopCaptchaVerifier),
            license: Arc::new(KeyFormatLicenseValidator),
            oauth: Arc::new(DisabledOAuth),
            clock,
            pool: None,
        })
    }

    /// Postgres-backed stores plus the outbound clients the config enables.
    ///
    /// # Errors
    /// Returns an error if the versions are inconsistent or an HTTP client
    /// cannot be built.
    pub fn postgres(pool: PgPool, config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let captcha: Arc<dyn CaptchaVerifier> = match config.recaptcha_secret() {
            Some(secret) if config.recaptcha_enabled() => Arc::new(
                RecaptchaVerifier::new(secret.clone(), config.outbound_timeout())
                    .context("failed to build reCAPTCHA client")?,
            ),
            _ => Arc::new(NoopCaptchaVerifier),
        };
        let oauth: Arc<dyn OAuthExchange> = match config.google() {
            Some(google) => Arc::new(
                GoogleOAuthClient::new(google.clone(), config.outbound_timeout())
                    .context("failed to build Google OAuth client")?,
            ),
            None => Arc::new(DisabledOAuth),
        };

        Ok(Self {
            store: Arc::new(PgEphemeralStore::new(pool.clone(), clock.clone())),
            principals: Arc::new(PgPrincipalStore::new(pool.clone())),
            challenges: Arc::new(PgChallengeStore::new(pool.clone())),
            versions: Arc::new(PgVersionSource::new(
                pool.clone(),
                configured_versions(config)?,
            )),
            notifier: Arc::new(OutboxNotifier::new(pool.clone())),
            records: Arc::new(PgRecordTable::new(pool.clone())),
            captcha,
            license: Arc::new(KeyFormatLicenseValidator),
            oauth,
            clock,
            pool: Some(pool),
        })
    }
}

/// Everything a handler or middleware needs, built once.
#[derive(Clone)]
pub struct AppState {
    pub config: AdmissionConfig,
    pub clock: Arc<dyn Clock>,
    pub login: LoginFlow,
    pub verifier: TokenVerifier,
    pub refresh: RefreshEngine,
    pub sessions: SessionRegistry,
    pub resolver: TenantResolver,
    pub principals: Arc<dyn PrincipalStore>,
    pub oauth: Arc<dyn OAuthExchange>,
    pub oauth_states: OAuthStates,
    pub records: Arc<dyn TenantTable<TenantRecord>>,
    pub versions: Arc<dyn VersionSource>,
    pub pool: Option<PgPool>,
}

impl AppState {
    /// # Errors
    /// Returns an error if the signing secret is unusable.
    pub fn new(config: AdmissionConfig, backends: Backends) -> Result<Self> {
        let Backends {
            store,
            principals,
            challenges,
            versions,
            notifier,
            records,
            captcha,
            license,
            oauth,
            clock,
            pool,
        } = backends;

        let keys = Arc::new(
            TokenKeys::from_secret(config.jwt_secret()).context("invalid JWT secret")?,
        );
        let sessions = SessionRegistry::new(store.clone());

        let issuer = TokenIssuer::new(
            keys.clone(),
            versions.clone(),
            sessions.clone(),
            clock.clone(),
            TokenSettings {
                access_ttl: config.access_ttl(),
                refresh_ttl: config.refresh_ttl(),
                single_session: config.single_session(),
            },
        );
        let verifier = TokenVerifier::new(
            keys,
            versions.clone(),
            sessions.clone(),
            clock.clone(),
            config.single_session(),
        );
        let refresh = RefreshEngine::new(
            verifier.clone(),
            issuer.clone(),
            sessions.clone(),
            principals.clone(),
            clock.clone(),
        );

        let abuse = AbuseController::new(
            store.clone(),
            clock.clone(),
            AbusePolicy {
                ip_limit: config.ip_login_limit(),
                identity_limit: config.identity_failure_limit(),
                lockout: config.lockout_duration(),
            },
        );
        let mfa = MfaEngine::new(
            challenges,
            notifier.clone(),
            clock.clone(),
            MfaSettings {
                code_ttl: config.mfa_code_ttl(),
                max_attempts: config.mfa_max_attempts(),
                dispatch_timeout: config.outbound_timeout(),
            },
        );
        let login = LoginFlow::new(
            principals.clone(),
            abuse,
            mfa,
            issuer,
            notifier,
            LoginSettings {
                mfa_enabled: config.mfa_enabled(),
                recaptcha_enabled: config.recaptcha_enabled(),
                license_check_enabled: config.license_check_enabled(),
                notify_timeout: config.outbound_timeout(),
            },
        )
        .with_captcha(captcha)
        .with_license(license);

        let resolver = TenantResolver::new(
            sessions.clone(),
            principals.clone(),
            config.tenant_header_fallback(),
        );

        Ok(Self {
            clock,
            login,
            verifier,
            refresh,
            sessions,
            resolver,
            principals,
            oauth,
            oauth_states: OAuthStates::new(store),
            records,
            versions,
            pool,
            config,
        })
    }
}
