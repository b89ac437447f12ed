use utoipa::{
    openapi::{
        security::{Http, HttpAuthScheme, SecurityScheme},
        Contact, License,
    },
    Modify, OpenApi,
};

use super::handlers::{
    auth::{login, mfa, oauth, refresh, session, types, version},
    health, resources,
};
use crate::tenant::TenantRecord;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        login::login,
        mfa::verify,
        mfa::resend,
        refresh::refresh,
        session::logout,
        session::verify,
        session::consent,
        version::version,
        oauth::start,
        oauth::callback,
        resources::list,
        resources::create,
        resources::fetch,
        resources::update,
        resources::delete,
    ),
    components(schemas(
        health::Health,
        types::LoginRequest,
        types::LoginResponse,
        types::UserSummary,
        types::MfaRequiredResponse,
        types::MfaVerifyRequest,
        types::MfaResendRequest,
        types::RefreshRequest,
        types::RefreshResponse,
        types::LogoutRequest,
        types::StatusResponse,
        types::VerifyResponse,
        types::ConsentRequest,
        types::ConsentResponse,
        types::VersionResponse,
        types::ErrorResponse,
        resources::RecordInput,
        TenantRecord,
    )),
    modifiers(&CargoInfo, &BearerAuth),
    tags(
        (name = "auth", description = "Login, MFA, token rotation and session endpoints"),
        (name = "resource", description = "Tenant-scoped records"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// Use Cargo.toml metadata for the document info.
struct CargoInfo;

impl Modify for CargoInfo {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = env!("CARGO_PKG_NAME").to_string();
        openapi.info.version = env!("CARGO_PKG_VERSION").to_string();
        openapi.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
        openapi.info.contact = cargo_contact();
        openapi.info.license = cargo_license();
    }
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let Some(start) = author.find('<') else {
        let name = author.trim();
        return (if name.is_empty() { None } else { Some(name) }, None);
    };
    let name = author[..start].trim();
    let email = author[start + 1..].trim_end_matches('>').trim();
    (
        if name.is_empty() { None } else { Some(name) },
        if email.is_empty() { None } else { Some(email) },
    )
}
