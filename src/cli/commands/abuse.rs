use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::IpAddr;

pub const ARG_IP_LOGIN_LIMIT: &str = "ip-login-limit";
pub const ARG_IDENTITY_FAILURE_LIMIT: &str = "identity-failure-limit";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_REFRESH_IP_LIMIT: &str = "refresh-ip-limit";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";

#[derive(Debug, Clone)]
pub struct Options {
    pub ip_login_limit: u64,
    pub identity_failure_limit: u64,
    pub lockout_seconds: u64,
    pub refresh_ip_limit: u64,
    pub trusted_proxies: Vec<IpAddr>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);
        Self {
            ip_login_limit: get(ARG_IP_LOGIN_LIMIT, 10),
            identity_failure_limit: get(ARG_IDENTITY_FAILURE_LIMIT, 5),
            lockout_seconds: get(ARG_LOCKOUT_SECONDS, 900),
            refresh_ip_limit: get(ARG_REFRESH_IP_LIMIT, 100),
            trusted_proxies: matches
                .get_many::<IpAddr>(ARG_TRUSTED_PROXIES)
                .map(|proxies| proxies.copied().collect())
                .unwrap_or_default(),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_IP_LOGIN_LIMIT)
                .long(ARG_IP_LOGIN_LIMIT)
                .help("Login attempts allowed per client IP per minute")
                .env("CUSTODIA_IP_LOGIN_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_IDENTITY_FAILURE_LIMIT)
                .long(ARG_IDENTITY_FAILURE_LIMIT)
                .help("Failed logins allowed per identity before lockout")
                .env("CUSTODIA_IDENTITY_FAILURE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("Lockout duration in seconds once the failure limit is hit")
                .env("CUSTODIA_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_IP_LIMIT)
                .long(ARG_REFRESH_IP_LIMIT)
                .help("Refresh requests allowed per client IP per minute")
                .env("CUSTODIA_REFRESH_IP_LIMIT")
                .default_value("100")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Comma-separated proxy addresses allowed to set X-Forwarded-For")
                .env("CUSTODIA_TRUSTED_PROXIES")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(IpAddr)),
        )
}
