//! # Custodia (request admission for multi-tenant GRC services)
//!
//! `custodia` is the gate every API request crosses before a business handler
//! runs. It authenticates principals, mints and rotates bearer tokens, runs
//! one-time-code challenges, throttles abusive callers, and pins every data
//! access to the caller's tenant.
//!
//! ## Pipeline
//!
//! `request -> request log -> CORS -> token verifier -> tenant resolver ->
//! session-timeout guard -> handler (tenant gate) -> response hardener`.
//!
//! Login, refresh, MFA and logout endpoints skip the verifier/resolver/guard
//! trio and drive the authenticator, abuse controller, MFA engine, token issuer
//! and refresh engine directly.
//!
//! ## Shared state
//!
//! Session records, abuse counters and the refresh blacklist live in an
//! [`cache::EphemeralStore`]: a TTL key/value store with an atomic
//! increment-and-read primitive. Postgres and in-memory implementations ship
//! with the crate; every component talks to the trait.

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod identity;
pub mod tenant;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_package_version() {
        assert!(APP_USER_AGENT.starts_with("custodia/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn git_commit_hash_is_hex_or_unknown() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
