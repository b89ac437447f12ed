//! CORS.
//!
//! Pre-flight requests are answered by the layer and never reach a handler.
//! Credentials are allowed, so the caller's `Origin` is mirrored instead of a
//! wildcard; `*` is only stamped on responses to requests that sent no origin.

use axum::http::{
    header::{ACCEPT, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_TYPE, ORIGIN},
    HeaderName, HeaderValue, Method,
};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

const MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Mirrors the caller's origin with credentials and a one-day pre-flight cache.
#[must_use]
pub fn layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-tenant-id"),
        ])
        .max_age(MAX_AGE)
}

/// `Access-Control-Allow-Origin: *` for origin-less requests; mirrored origins win.
#[must_use]
pub fn wildcard_fallback() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{
            header::{
                ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
                ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_MAX_AGE,
                ACCESS_CONTROL_REQUEST_METHOD,
            },
            Request, StatusCode,
        },
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/auth/version", get(|| async { "ok" }))
            .layer(layer())
            .layer(wildcard_fallback())
    }

    #[tokio::test]
    async fn preflight_mirrors_origin_with_credentials() -> anyhow::Result<()> {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/auth/version")
                    .header(ORIGIN, "https://app.example.com")
                    .header(ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
        assert!(headers[ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()?
            .contains("DELETE"));
        assert!(headers[ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()?
            .contains("x-tenant-id"));
        Ok(())
    }

    #[tokio::test]
    async fn request_without_origin_gets_wildcard() -> anyhow::Result<()> {
        let response = app()
            .oneshot(Request::builder().uri("/auth/version").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        Ok(())
    }

    #[tokio::test]
    async fn simple_request_mirrors_origin() -> anyhow::Result<()> {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/auth/version")
                    .header(ORIGIN, "https://app.example.com")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        Ok(())
    }
}
