pub mod abuse;
pub mod integrations;
pub mod logging;
pub mod mfa;
pub mod tokens;

use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        BoolishValueParser,
    },
    Arg, ColorChoice, Command,
};

/// On/off flag: `--flag`, `--flag=false` or the env var (`true`, `0`, `yes`, ...).
fn switch(id: &'static str, env: &'static str, default: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .env(env)
        .default_value(default)
        .num_args(0..=1)
        .require_equals(true)
        .default_missing_value("true")
        .value_parser(BoolishValueParser::new())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("custodia")
        .about("Request admission for multi-tenant GRC services")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CUSTODIA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("CUSTODIA_DSN")
                .required(true),
        );

    let command = tokens::with_args(command);
    let command = abuse::with_args(command);
    let command = mfa::with_args(command);
    let command = integrations::with_args(command);
    logging::with_args(command)
}
