//! Map validated CLI arguments to an action.
//!
//! Every admission setting lands in one [`AdmissionConfig`]; the outbox
//! poller gets its own [`EmailWorkerConfig`].

use crate::auth::notify::EmailWorkerConfig;
use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{abuse, integrations, mfa, tokens};
use crate::config::AdmissionConfig;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let token_opts = tokens::Options::parse(matches)?;
    let abuse_opts = abuse::Options::parse(matches);
    let mfa_opts = mfa::Options::parse(matches);
    let integration_opts = integrations::Options::parse(matches)?;

    if integration_opts.min_supported_version > integration_opts.current_version {
        anyhow::bail!(
            "--min-supported-version ({}) is newer than --current-version ({})",
            integration_opts.min_supported_version,
            integration_opts.current_version
        );
    }

    let config = AdmissionConfig::new(token_opts.jwt_secret, integration_opts.frontend_url)
        .with_access_ttl_seconds(token_opts.access_ttl_seconds)
        .with_refresh_ttl_seconds(token_opts.refresh_ttl_seconds)
        .with_session_timeout_seconds(token_opts.session_timeout_seconds)
        .with_single_session(token_opts.single_session)
        .with_tenant_header_fallback(token_opts.tenant_header_fallback)
        .with_ip_login_limit(abuse_opts.ip_login_limit)
        .with_identity_failure_limit(abuse_opts.identity_failure_limit)
        .with_lockout_seconds(abuse_opts.lockout_seconds)
        .with_refresh_ip_limit(abuse_opts.refresh_ip_limit)
        .with_trusted_proxies(abuse_opts.trusted_proxies)
        .with_mfa(mfa_opts.enabled)
        .with_mfa_code_ttl_seconds(mfa_opts.code_ttl_seconds)
        .with_mfa_max_attempts(mfa_opts.max_attempts)
        .with_recaptcha(
            integration_opts.recaptcha_enabled,
            integration_opts.recaptcha_secret,
        )
        .with_license_check(integration_opts.license_check_enabled)
        .with_versions(
            integration_opts.current_version,
            integration_opts.min_supported_version,
        )
        .with_production(integration_opts.production)
        .with_outbound_timeout_seconds(integration_opts.outbound_timeout_seconds)
        .with_google(integration_opts.google);

    let email = EmailWorkerConfig::new().with_poll_interval_seconds(mfa_opts.outbox_poll_seconds);

    Ok(Action::Server(Args {
        port,
        dsn,
        config,
        email,
    }))
}
