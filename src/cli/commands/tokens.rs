use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use super::switch;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";
pub const ARG_SESSION_TIMEOUT_SECONDS: &str = "session-timeout-seconds";
pub const ARG_SINGLE_SESSION: &str = "single-session";
pub const ARG_TENANT_HEADER_FALLBACK: &str = "tenant-header-fallback";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub session_timeout_seconds: u64,
    pub single_session: bool,
    pub tenant_header_fallback: bool,
}

impl Options {
    /// Parse token and session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        Ok(Self {
            jwt_secret,
            access_ttl_seconds: matches
                .get_one::<u64>(ARG_ACCESS_TTL_SECONDS)
                .copied()
                .unwrap_or(3600),
            refresh_ttl_seconds: matches
                .get_one::<u64>(ARG_REFRESH_TTL_SECONDS)
                .copied()
                .unwrap_or(604_800),
            session_timeout_seconds: matches
                .get_one::<u64>(ARG_SESSION_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(3600),
            single_session: matches
                .get_one::<bool>(ARG_SINGLE_SESSION)
                .copied()
                .unwrap_or(true),
            tenant_header_fallback: matches
                .get_one::<bool>(ARG_TENANT_HEADER_FALLBACK)
                .copied()
                .unwrap_or(false),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign access and refresh tokens")
                .env("CUSTODIA_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_SECONDS)
                .long(ARG_ACCESS_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("CUSTODIA_ACCESS_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_SECONDS)
                .long(ARG_REFRESH_TTL_SECONDS)
                .help("Refresh token lifetime in seconds")
                .env("CUSTODIA_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SESSION_TIMEOUT_SECONDS)
                .long(ARG_SESSION_TIMEOUT_SECONDS)
                .help("Absolute session lifetime measured from the original login")
                .env("CUSTODIA_SESSION_TIMEOUT_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            switch(ARG_SINGLE_SESSION, "CUSTODIA_SINGLE_SESSION", "true")
                .help("Reject tokens whose session is no longer the principal's current one"),
        )
        .arg(
            switch(
                ARG_TENANT_HEADER_FALLBACK,
                "CUSTODIA_TENANT_HEADER_FALLBACK",
                "false",
            )
            .help("Accept X-Tenant-ID when neither the token nor the session names a tenant"),
        )
}
