//! Password login orchestration.
//!
//! Flow Overview:
//! 1) Charge the caller's IP.
//! 2) Validate fields, then the captcha when enabled.
//! 3) Refuse locked identities before the verifier runs.
//! 4) Check the password; failures feed the abuse controller, and the failure
//!    that trips the lock sends the lockout notice.
//! 5) License check, first-login activation.
//! 6) Either pivot to an MFA challenge or mint tokens.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::abuse::{AbuseController, FailureOutcome};
use super::captcha::{self, CaptchaVerifier, NoopCaptchaVerifier};
use super::license::{KeyFormatLicenseValidator, LicenseValidator};
use super::mfa::{MfaEngine, MfaError};
use super::notify::{dispatch, LockoutNotice, Notifier};
use super::password::{Authenticator, LoginIdentifier};
use super::token::{IssuedTokens, TokenError, TokenIssuer};
use super::{normalize_identity, AuthError};
use crate::identity::{Principal, PrincipalStore};

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Mfa(#[from] MfaError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<crate::cache::StoreError> for LoginError {
    fn from(err: crate::cache::StoreError) -> Self {
        Self::Auth(AuthError::Store(err))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoginSettings {
    pub mfa_enabled: bool,
    pub recaptcha_enabled: bool,
    pub license_check_enabled: bool,
    pub notify_timeout: Duration,
}

/// Raw login fields as received.
#[derive(Clone, Copy, Debug)]
pub struct LoginAttempt<'a> {
    pub identifier: &'a str,
    pub login_type: Option<&'a str>,
    pub password: &'a str,
    pub captcha: Option<&'a str>,
    pub otp: Option<&'a str>,
    pub ip: &'a str,
}

/// Who an MFA verify/resend request is about.
#[derive(Clone, Debug)]
pub enum MfaSubject {
    Identifier(LoginIdentifier),
    Email(String),
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated {
        principal: Principal,
        tokens: IssuedTokens,
    },
    MfaRequired {
        email_masked: String,
    },
}

#[derive(Clone)]
pub struct LoginFlow {
    authenticator: Authenticator,
    abuse: AbuseController,
    mfa: MfaEngine,
    issuer: TokenIssuer,
    principals: Arc<dyn PrincipalStore>,
    notifier: Arc<dyn Notifier>,
    captcha: Arc<dyn CaptchaVerifier>,
    license: Arc<dyn LicenseValidator>,
    settings: LoginSettings,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        abuse: AbuseController,
        mfa: MfaEngine,
        issuer: TokenIssuer,
        notifier: Arc<dyn Notifier>,
        settings: LoginSettings,
    ) -> Self {
        Self {
            authenticator: Authenticator::new(principals.clone()),
            abuse,
            mfa,
            issuer,
            principals,
            notifier,
            captcha: Arc::new(NoopCaptchaVerifier),
            license: Arc::new(KeyFormatLicenseValidator),
            settings,
        }
    }

    #[must_use]
    pub fn with_captcha(mut self, captcha: Arc<dyn CaptchaVerifier>) -> Self {
        self.captcha = captcha;
        self
    }

    #[must_use]
    pub fn with_license(mut self, license: Arc<dyn LicenseValidator>) -> Self {
        self.license = license;
        self
    }

    #[must_use]
    pub fn abuse(&self) -> &AbuseController {
        &self.abuse
    }

    /// # Errors
    /// Any [`LoginError`]; each maps to one HTTP status at the boundary.
    pub async fn login(&self, attempt: LoginAttempt<'_>) -> Result<LoginOutcome, LoginError> {
        self.abuse.charge_login_ip(attempt.ip).await?;

        if attempt.identifier.trim().is_empty() {
            return Err(AuthError::InvalidInput("Missing username".to_string()).into());
        }
        if attempt.password.is_empty() {
            return Err(AuthError::InvalidInput("Missing password".to_string()).into());
        }
        if self.settings.recaptcha_enabled {
            let token = attempt.captcha.map(str::trim).unwrap_or_default();
            if token.is_empty() {
                return Err(AuthError::InvalidInput("Missing captcha".to_string()).into());
            }
            if !captcha::passes(self.captcha.as_ref(), token, Some(attempt.ip)).await {
                return Err(AuthError::InvalidInput("Invalid captcha".to_string()).into());
            }
        }

        let identifier = LoginIdentifier::parse(attempt.identifier, attempt.login_type)?;
        let identity = identifier.identity_key();
        self.abuse.ensure_not_locked(&identity).await?;

        let principal = match self
            .authenticator
            .authenticate(&identifier, attempt.password)
            .await
        {
            Ok(principal) => principal,
            Err(AuthError::InvalidCredentials { .. }) => {
                return Err(self
                    .register_failure(&identifier, &identity, attempt.ip)
                    .await?
                    .into());
            }
            Err(err) => return Err(err.into()),
        };
        self.abuse.record_success(&identity).await?;

        let principal = self.admit(principal).await?;

        if self.settings.mfa_enabled {
            match attempt.otp.map(str::trim).filter(|otp| !otp.is_empty()) {
                None => {
                    let email_masked = self.mfa.start(&principal).await?;
                    return Ok(LoginOutcome::MfaRequired { email_masked });
                }
                Some(otp) => {
                    self.mfa.verify(&principal, otp).await?;
                }
            }
        }

        let tokens = self.issuer.issue(&principal, None, None).await?;
        info!(user_id = principal.id, "login succeeded");
        Ok(LoginOutcome::Authenticated { principal, tokens })
    }

    /// Finish a login paused on MFA.
    ///
    /// # Errors
    /// `Mfa` for code failures, `Auth` for rate limiting.
    pub async fn verify_mfa(
        &self,
        subject: &MfaSubject,
        code: &str,
        ip: &str,
    ) -> Result<(Principal, IssuedTokens), LoginError> {
        self.abuse
            .charge("mfa", ip, self.abuse.policy().ip_limit)
            .await?;
        let Some(principal) = self.subject_principal(subject).await? else {
            return Err(MfaError::Unavailable.into());
        };
        self.mfa.verify(&principal, code).await?;
        let tokens = self.issuer.issue(&principal, None, None).await?;
        info!(user_id = principal.id, "login succeeded after mfa");
        Ok((principal, tokens))
    }

    /// # Errors
    /// `Mfa` when there is nothing to resend or the current code is still live.
    pub async fn resend_mfa(&self, subject: &MfaSubject, ip: &str) -> Result<String, LoginError> {
        self.abuse
            .charge("mfa", ip, self.abuse.policy().ip_limit)
            .await?;
        let Some(principal) = self.subject_principal(subject).await? else {
            return Err(MfaError::NoChallenge.into());
        };
        Ok(self.mfa.resend(&principal).await?)
    }

    /// Login for an email the external provider has verified.
    ///
    /// # Errors
    /// `InvalidCredentials` when no principal owns the address.
    pub async fn login_verified_email(
        &self,
        email: &str,
    ) -> Result<(Principal, IssuedTokens), LoginError> {
        let Some(principal) = self
            .principals
            .find_by_email(&normalize_identity(email))
            .await?
        else {
            return Err(AuthError::InvalidCredentials {
                attempts: 0,
                limit: 0,
            }
            .into());
        };
        let principal = self.admit(principal).await?;
        let tokens = self.issuer.issue(&principal, None, None).await?;
        info!(user_id = principal.id, "external login succeeded");
        Ok((principal, tokens))
    }

    async fn admit(&self, mut principal: Principal) -> Result<Principal, AuthError> {
        if self.settings.license_check_enabled && !self.license.validate(&principal) {
            warn!(user_id = principal.id, "license check failed");
            return Err(AuthError::LicenseInvalid);
        }
        if !principal.is_active {
            self.principals.activate(principal.id).await?;
            principal.is_active = true;
            info!(user_id = principal.id, "principal activated on first login");
        }
        Ok(principal)
    }

    async fn register_failure(
        &self,
        identifier: &LoginIdentifier,
        identity: &str,
        ip: &str,
    ) -> Result<AuthError, AuthError> {
        match self.abuse.record_failure(identity).await? {
            FailureOutcome::Counted { attempts, limit } => {
                Ok(AuthError::InvalidCredentials { attempts, limit })
            }
            FailureOutcome::Locked {
                remaining_seconds, ..
            } => {
                if let Some(principal) = self.authenticator.resolve(identifier).await? {
                    let notice = LockoutNotice {
                        email: principal.email.clone(),
                        display_name: principal.display_name(),
                        ip: ip.to_string(),
                        locked_for: self.abuse.policy().lockout,
                    };
                    dispatch(
                        "lockout",
                        self.settings.notify_timeout,
                        self.notifier.send_lockout_email(&notice),
                    )
                    .await;
                }
                Ok(AuthError::AccountLocked { remaining_seconds })
            }
        }
    }

    async fn subject_principal(&self, subject: &MfaSubject) -> Result<Option<Principal>, AuthError> {
        match subject {
            MfaSubject::Identifier(identifier) => self.authenticator.resolve(identifier).await,
            MfaSubject::Email(email) => Ok(self
                .principals
                .find_by_email(&normalize_identity(email))
                .await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::abuse::AbusePolicy;
    use crate::auth::mfa::{MemoryChallengeStore, MfaSettings};
    use crate::auth::notify::MfaCodeNotice;
    use crate::auth::password::hash_secret;
    use crate::auth::session::SessionRegistry;
    use crate::auth::token::{TokenKeys, TokenSettings};
    use crate::auth::version::{ProductVersion, StaticVersionSource, VersionInfo};
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;
    use crate::identity::{MemoryPrincipalStore, TenantId};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        lockouts: Mutex<Vec<LockoutNotice>>,
        codes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send_lockout_email(&self, notice: &LockoutNotice) -> anyhow::Result<()> {
            self.lockouts
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(notice.clone());
            Err(anyhow::anyhow!("smtp unavailable"))
        }

        async fn send_mfa_code(&self, notice: &MfaCodeNotice) -> anyhow::Result<()> {
            self.codes
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(notice.code.clone());
            Ok(())
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        principals: Arc<MemoryPrincipalStore>,
        notifier: Arc<Recorder>,
        flow: LoginFlow,
    }

    fn fixture(settings: LoginSettings) -> anyhow::Result<Fixture> {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let principals = Arc::new(MemoryPrincipalStore::new());
        principals.upsert(Principal {
            id: 2,
            username: "bob".to_string(),
            first_name: Some("Bob".to_string()),
            last_name: None,
            email: "bob@example.com".to_string(),
            password_verifier: hash_secret("right")?,
            is_active: false,
            tenant_id: Some(TenantId(7)),
            license_key: None,
            consent_accepted: false,
            password_changed_at: None,
        })?;
        let notifier = Arc::new(Recorder::default());
        let abuse = AbuseController::new(
            store.clone(),
            clock.clone(),
            AbusePolicy {
                ip_limit: 10,
                identity_limit: 5,
                lockout: Duration::from_secs(900),
            },
        );
        let mfa = MfaEngine::new(
            Arc::new(MemoryChallengeStore::new()),
            notifier.clone(),
            clock.clone(),
            MfaSettings {
                code_ttl: Duration::from_secs(300),
                max_attempts: 3,
                dispatch_timeout: Duration::from_secs(5),
            },
        );
        let issuer = TokenIssuer::new(
            Arc::new(TokenKeys::from_secret(&SecretString::from("login".to_string()))?),
            Arc::new(StaticVersionSource::new(VersionInfo::new(
                ProductVersion::new(vec![1]),
                ProductVersion::new(vec![1]),
            )?)),
            SessionRegistry::new(store),
            clock.clone(),
            TokenSettings {
                access_ttl: Duration::from_secs(3600),
                refresh_ttl: Duration::from_secs(604_800),
                single_session: true,
            },
        );
        let flow = LoginFlow::new(
            principals.clone(),
            abuse,
            mfa,
            issuer,
            notifier.clone(),
            settings,
        );
        Ok(Fixture {
            clock,
            principals,
            notifier,
            flow,
        })
    }

    fn attempt<'a>(password: &'a str, ip: &'a str) -> LoginAttempt<'a> {
        LoginAttempt {
            identifier: "Bob",
            login_type: None,
            password,
            captcha: None,
            otp: None,
            ip,
        }
    }

    #[tokio::test]
    async fn first_login_activates_principal() -> anyhow::Result<()> {
        let f = fixture(LoginSettings::default())?;
        let outcome = f.flow.login(attempt("right", "1.1.1.1")).await?;
        let LoginOutcome::Authenticated { principal, tokens } = outcome else {
            anyhow::bail!("expected tokens");
        };
        assert!(principal.is_active);
        assert!(!tokens.access_token.is_empty());
        assert_eq!(
            f.principals.find_by_id(2).await?.map(|p| p.is_active),
            Some(true)
        );
        Ok(())
    }

    #[tokio::test]
    async fn lockout_survives_failed_notification() -> anyhow::Result<()> {
        let f = fixture(LoginSettings::default())?;
        for expected in 1..5 {
            match f.flow.login(attempt("wrong", "1.1.1.1")).await {
                Err(LoginError::Auth(AuthError::InvalidCredentials { attempts, limit })) => {
                    assert_eq!((attempts, limit), (expected, 5));
                }
                other => anyhow::bail!("unexpected {other:?}"),
            }
        }
        assert!(matches!(
            f.flow.login(attempt("wrong", "1.1.1.1")).await,
            Err(LoginError::Auth(AuthError::AccountLocked {
                remaining_seconds: 900
            }))
        ));
        let notices = f.notifier.lockouts.lock().map(|n| n.clone()).unwrap_or_default();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].email, "bob@example.com");
        assert_eq!(notices[0].ip, "1.1.1.1");

        assert!(matches!(
            f.flow.login(attempt("right", "1.1.1.2")).await,
            Err(LoginError::Auth(AuthError::AccountLocked { .. }))
        ));
        f.clock.advance(900);
        assert!(f.flow.login(attempt("right", "1.1.1.2")).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn missing_fields_are_invalid_input() -> anyhow::Result<()> {
        let f = fixture(LoginSettings::default())?;
        assert!(matches!(
            f.flow.login(attempt("", "1.1.1.1")).await,
            Err(LoginError::Auth(AuthError::InvalidInput(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn captcha_is_required_when_enabled() -> anyhow::Result<()> {
        let f = fixture(LoginSettings {
            recaptcha_enabled: true,
            ..LoginSettings::default()
        })?;
        assert!(matches!(
            f.flow.login(attempt("right", "1.1.1.1")).await,
            Err(LoginError::Auth(AuthError::InvalidInput(_)))
        ));
        let mut with_captcha = attempt("right", "1.1.1.1");
        with_captcha.captcha = Some("ok");
        assert!(f.flow.login(with_captcha).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn license_check_blocks_missing_key() -> anyhow::Result<()> {
        let f = fixture(LoginSettings {
            license_check_enabled: true,
            ..LoginSettings::default()
        })?;
        assert!(matches!(
            f.flow.login(attempt("right", "1.1.1.1")).await,
            Err(LoginError::Auth(AuthError::LicenseInvalid))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn mfa_pivot_then_verify_issues_tokens() -> anyhow::Result<()> {
        let f = fixture(LoginSettings {
            mfa_enabled: true,
            ..LoginSettings::default()
        })?;
        match f.flow.login(attempt("right", "1.1.1.1")).await? {
            LoginOutcome::MfaRequired { email_masked } => {
                assert_eq!(email_masked, "b***@example.com");
            }
            LoginOutcome::Authenticated { .. } => anyhow::bail!("tokens issued before mfa"),
        }
        let code = f
            .notifier
            .codes
            .lock()
            .ok()
            .and_then(|codes| codes.last().cloned())
            .unwrap_or_default();
        let subject = MfaSubject::Email("bob@example.com".to_string());
        let (principal, tokens) = f.flow.verify_mfa(&subject, &code, "1.1.1.1").await?;
        assert_eq!(principal.id, 2);
        assert!(!tokens.refresh_token.is_empty());
        Ok(())
    }
}
