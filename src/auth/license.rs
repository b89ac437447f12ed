//! License check run after a successful password check.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::identity::Principal;

static LICENSE_KEY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{4}(-[A-Z0-9]{4}){3}$").ok());

pub trait LicenseValidator: Send + Sync {
    fn validate(&self, principal: &Principal) -> bool;
}

/// Accepts any well-formed key: four groups of four alphanumerics.
#[derive(Clone, Debug, Default)]
pub struct KeyFormatLicenseValidator;

impl LicenseValidator for KeyFormatLicenseValidator {
    fn validate(&self, principal: &Principal) -> bool {
        let Some(key) = principal.license_key.as_deref() else {
            return false;
        };
        let key = key.trim().to_ascii_uppercase();
        LICENSE_KEY
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&key))
    }
}
