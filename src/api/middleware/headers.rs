//! Response hardening.
//!
//! Security headers go on every response. Auth-bearing and account paths are
//! additionally marked uncacheable, which is the only rule that needs to look
//! at the request.

use axum::{
    extract::Request,
    http::{
        header::{
            AUTHORIZATION, CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY,
            STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
        HeaderMap, HeaderName, HeaderValue,
    },
    middleware::{from_fn, Next},
    response::Response,
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

macro_rules! csp {
    () => {
        "default-src 'self'; script-src 'self' 'unsafe-inline'; \
         style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self' data:; \
         connect-src 'self'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'"
    };
}

const PERMISSIONS_POLICY: &str = "geolocation=(), camera=(), microphone=(), usb=(), payment=(), \
     magnetometer=(), gyroscope=(), accelerometer=(), fullscreen=(self)";
const CSP: &str = csp!();
const CSP_PRODUCTION: &str = concat!(csp!(), "; upgrade-insecure-requests");
const HSTS: &str = "max-age=31536000; includeSubDomains";
const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";
const SENSITIVE_PREFIXES: [&str; 3] = ["/auth", "/user", "/admin"];

#[derive(Clone, Copy, Debug, Default)]
pub struct HardeningPolicy {
    pub production: bool,
}

impl HardeningPolicy {
    fn fixed_headers(self) -> Vec<(HeaderName, &'static str)> {
        let mut headers = vec![
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (X_FRAME_OPTIONS, "DENY"),
            (REFERRER_POLICY, "strict-origin-when-cross-origin"),
            (HeaderName::from_static("permissions-policy"), PERMISSIONS_POLICY),
            (HeaderName::from_static("cross-origin-opener-policy"), "same-origin"),
            (HeaderName::from_static("cross-origin-resource-policy"), "same-origin"),
        ];
        if self.production {
            headers.push((CONTENT_SECURITY_POLICY, CSP_PRODUCTION));
            headers.push((STRICT_TRANSPORT_SECURITY, HSTS));
        } else {
            headers.push((CONTENT_SECURITY_POLICY, CSP));
        }
        headers
    }
}

fn is_sensitive(path: &str, request_headers: &HeaderMap) -> bool {
    request_headers.contains_key(AUTHORIZATION)
        || SENSITIVE_PREFIXES.iter().any(|prefix| {
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
}

async fn no_store_sensitive(request: Request, next: Next) -> Response {
    let sensitive = is_sensitive(request.uri().path(), request.headers());
    let mut response = next.run(request).await;
    if sensitive {
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    }
    response
}

/// Wrap `router` so every response leaves hardened.
pub fn harden(router: Router, policy: HardeningPolicy) -> Router {
    policy
        .fixed_headers()
        .into_iter()
        .fold(router.layer(from_fn(no_store_sensitive)), |router, (name, value)| {
            router.layer(SetResponseHeaderLayer::overriding(
                name,
                HeaderValue::from_static(value),
            ))
        })
}
