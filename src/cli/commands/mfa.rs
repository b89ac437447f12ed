use clap::{Arg, ArgMatches, Command};

use super::switch;

pub const ARG_MFA_ENABLED: &str = "mfa-enabled";
pub const ARG_MFA_CODE_TTL_SECONDS: &str = "mfa-code-ttl-seconds";
pub const ARG_MFA_MAX_ATTEMPTS: &str = "mfa-max-attempts";
pub const ARG_EMAIL_OUTBOX_POLL_SECONDS: &str = "email-outbox-poll-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub enabled: bool,
    pub code_ttl_seconds: u64,
    pub max_attempts: u32,
    pub outbox_poll_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            enabled: matches
                .get_one::<bool>(ARG_MFA_ENABLED)
                .copied()
                .unwrap_or(false),
            code_ttl_seconds: matches
                .get_one::<u64>(ARG_MFA_CODE_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
            max_attempts: matches
                .get_one::<u32>(ARG_MFA_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(3),
            outbox_poll_seconds: matches
                .get_one::<u64>(ARG_EMAIL_OUTBOX_POLL_SECONDS)
                .copied()
                .unwrap_or(5),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            switch(ARG_MFA_ENABLED, "CUSTODIA_MFA_ENABLED", "false")
                .help("Require an emailed one-time code after a correct password"),
        )
        .arg(
            Arg::new(ARG_MFA_CODE_TTL_SECONDS)
                .long(ARG_MFA_CODE_TTL_SECONDS)
                .help("Lifetime of a one-time code in seconds")
                .env("CUSTODIA_MFA_CODE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(60..=600)),
        )
        .arg(
            Arg::new(ARG_MFA_MAX_ATTEMPTS)
                .long(ARG_MFA_MAX_ATTEMPTS)
                .help("Wrong codes allowed before the challenge is discarded")
                .env("CUSTODIA_MFA_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_POLL_SECONDS)
                .long(ARG_EMAIL_OUTBOX_POLL_SECONDS)
                .help("Email outbox poll interval in seconds")
                .env("CUSTODIA_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}
