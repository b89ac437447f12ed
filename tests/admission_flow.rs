//! End-to-end admission scenarios against the full router with in-memory
//! backends and a manual clock.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use custodia::api::{self, AppState, Backends};
use custodia::auth::captcha::CaptchaVerifier;
use custodia::auth::notify::{LockoutNotice, MfaCodeNotice, Notifier};
use custodia::auth::password::hash_secret;
use custodia::auth::version::{ProductVersion, VersionInfo, VersionSource};
use custodia::cache::{EphemeralStore, MemoryStore, StoreError, TtlPolicy};
use custodia::clock::{Clock, ManualClock};
use custodia::config::AdmissionConfig;
use custodia::identity::{MemoryPrincipalStore, Principal, TenantId};
use custodia::tenant::{MemoryTenantTable, TenantRecord};

const START: i64 = 1_700_000_000;
const ALICE_ID: i64 = 1;
const BOB_ID: i64 = 2;
const CAROL_ID: i64 = 3;
const CLIENT: &str = "203.0.113.10:40000";
const PROXY: &str = "10.0.0.1:8443";

/// Accepts exactly the token "ok".
struct StaticCaptcha;

#[async_trait]
impl CaptchaVerifier for StaticCaptcha {
    async fn verify(&self, token: &str, _remote_ip: Option<&str>) -> Result<bool> {
        Ok(token == "ok")
    }
}

#[derive(Default)]
struct RecordingNotifier {
    codes: Mutex<Vec<MfaCodeNotice>>,
    lockouts: Mutex<Vec<LockoutNotice>>,
}

impl RecordingNotifier {
    fn last_code(&self) -> Result<String> {
        let codes = self.codes.lock().map_err(|_| anyhow!("poisoned"))?;
        codes
            .last()
            .map(|notice| notice.code.clone())
            .context("no code was sent")
    }

    fn lockout_count(&self) -> usize {
        self.lockouts.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_lockout_email(&self, notice: &LockoutNotice) -> Result<()> {
        self.lockouts
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(notice.clone());
        Ok(())
    }

    async fn send_mfa_code(&self, notice: &MfaCodeNotice) -> Result<()> {
        self.codes
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(notice.clone());
        Ok(())
    }
}

/// Hands control back to the scheduler before every store operation so
/// requests joined on one task interleave at each await.
struct YieldingStore(MemoryStore);

#[async_trait]
impl EphemeralStore for YieldingStore {
    async fn increment(&self, key: &str, ttl: Duration, policy: TtlPolicy) -> Result<u64, StoreError> {
        tokio::task::yield_now().await;
        self.0.increment(key, ttl, policy).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        tokio::task::yield_now().await;
        self.0.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.set(key, value, ttl).await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        tokio::task::yield_now().await;
        self.0.take(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.delete(key).await
    }
}

/// Version pair an operator can move while the server runs.
struct MovableFloor(Mutex<VersionInfo>);

impl MovableFloor {
    fn at(version: &str) -> Result<Self> {
        let version: ProductVersion = version.parse()?;
        Ok(Self(Mutex::new(VersionInfo::new(version.clone(), version)?)))
    }

    fn raise_to(&self, version: &str) -> Result<()> {
        let version: ProductVersion = version.parse()?;
        *self.0.lock().map_err(|_| anyhow!("poisoned"))? = VersionInfo::new(version.clone(), version)?;
        Ok(())
    }
}

#[async_trait]
impl VersionSource for MovableFloor {
    async fn current(&self) -> Result<VersionInfo, StoreError> {
        self.0
            .lock()
            .map(|info| info.clone())
            .map_err(|_| StoreError::Poisoned)
    }
}

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

fn principal(id: i64, username: &str, email: &str, password: &str, tenant: i64) -> Result<Principal> {
    Ok(Principal {
        id,
        username: username.to_string(),
        first_name: None,
        last_name: None,
        email: email.to_string(),
        password_verifier: hash_secret(password)?,
        is_active: true,
        tenant_id: Some(TenantId(tenant)),
        license_key: None,
        consent_accepted: true,
        password_changed_at: None,
    })
}

fn base_config() -> AdmissionConfig {
    AdmissionConfig::new(
        SecretString::from("integration-signing-secret".to_string()),
        "http://localhost:3000".to_string(),
    )
}

fn harness(config: AdmissionConfig) -> Result<Harness> {
    harness_with(config, |_| {})
}

fn harness_with(config: AdmissionConfig, customize: impl FnOnce(&mut Backends)) -> Result<Harness> {
    let clock = Arc::new(ManualClock::new(START));
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let principals = MemoryPrincipalStore::new();
    principals.upsert(principal(ALICE_ID, "alice", "alice@example.com", "P@ss1", 7)?)?;
    principals.upsert(principal(BOB_ID, "bob", "bob@example.com", "B0b-pass", 7)?)?;
    principals.upsert(principal(CAROL_ID, "carol", "a@b.com", "C@rol1", 7)?)?;

    let records = MemoryTenantTable::<TenantRecord>::new();
    records.seed(TenantRecord {
        id: 42,
        tenant_id: TenantId(9),
        name: "tenant-nine-secret-plan".to_string(),
        data: json!({ "owner": "someone else" }),
    })?;
    records.seed(TenantRecord {
        id: 7,
        tenant_id: TenantId(7),
        name: "own-record".to_string(),
        data: json!({}),
    })?;

    let notifier = Arc::new(RecordingNotifier::default());

    let mut backends = Backends::in_memory(&config, dyn_clock)?;
    backends.principals = Arc::new(principals);
    backends.records = Arc::new(records);
    backends.captcha = Arc::new(StaticCaptcha);
    backends.notifier = notifier.clone();
    customize(&mut backends);

    let state = Arc::new(AppState::new(config, backends)?);
    Ok(Harness {
        app: api::router(state),
        clock,
        notifier,
    })
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    Ok(match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    })
}

/// Deliver `request` as if it arrived on a socket from `peer`.
async fn call(app: &Router, peer: &str, mut request: Request<Body>) -> Result<(StatusCode, Value)> {
    let peer: SocketAddr = peer.parse()?;
    request.extensions_mut().insert(ConnectInfo(peer));

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    call(app, CLIENT, request(method, uri, bearer, body)?).await
}

/// A login attempt from `peer` carrying an `X-Forwarded-For` chain.
async fn forwarded_login(app: &Router, peer: &str, forwarded_for: &str, body: Value) -> Result<(StatusCode, Value)> {
    let mut request = request(Method::POST, "/auth/login", None, Some(body))?;
    request
        .headers_mut()
        .insert("x-forwarded-for", HeaderValue::from_str(forwarded_for)?);
    call(app, peer, request).await
}

async fn refresh_from(app: &Router, peer: &str, token: &str) -> Result<(StatusCode, Value)> {
    let body = json!({ "refresh_token": token });
    call(app, peer, request(Method::POST, "/auth/refresh", None, Some(body))?).await
}

async fn login(app: &Router, body: Value) -> Result<(StatusCode, Value)> {
    send(app, Method::POST, "/auth/login", None, Some(body)).await
}

fn token_field<'a>(body: &'a Value, field: &str) -> Result<&'a str> {
    body[field]
        .as_str()
        .with_context(|| format!("missing {field} in {body}"))
}

fn claims(token: &str) -> Result<Value> {
    let payload = token.split('.').nth(1).context("not a JWT")?;
    Ok(serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?)
}

#[tokio::test]
async fn happy_login_then_verify() -> Result<()> {
    let h = harness(base_config().with_recaptcha(
        true,
        Some(SecretString::from("captcha-secret".to_string())),
    ))?;

    let (status, body) = login(
        &h.app,
        json!({ "username": "alice", "password": "P@ss1", "captcha": "ok" }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["user"]["UserId"], ALICE_ID);
    assert_eq!(body["user"]["IsActive"], "Y");
    let access = token_field(&body, "access_token")?;
    token_field(&body, "refresh_token")?;

    let (status, body) = send(&h.app, Method::GET, "/auth/verify", Some(access), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["user"]["UserId"], ALICE_ID);
    assert_eq!(body["tenant_id"], 7);
    Ok(())
}

#[tokio::test]
async fn wrong_captcha_is_rejected_before_password_check() -> Result<()> {
    let h = harness(base_config().with_recaptcha(
        true,
        Some(SecretString::from("captcha-secret".to_string())),
    ))?;

    let (status, body) = login(
        &h.app,
        json!({ "username": "alice", "password": "P@ss1", "captcha": "bot" }),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
    Ok(())
}

#[tokio::test]
async fn verify_without_token_is_unauthorized() -> Result<()> {
    let h = harness(base_config())?;
    let (status, body) = send(&h.app, Method::GET, "/auth/verify", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "invalid_token");
    Ok(())
}

#[tokio::test]
async fn lockout_after_five_failures_then_recovers() -> Result<()> {
    let h = harness(base_config())?;
    let wrong = json!({ "username": "bob", "password": "nope" });

    for attempt in 1..=4u64 {
        let (status, body) = login(&h.app, wrong.clone()).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "attempt {attempt}: {body}");
        assert_eq!(body["attempts"], attempt);
        assert_eq!(body["max_attempts"], 5);
    }

    let (status, body) = login(&h.app, wrong.clone()).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    let message = token_field(&body, "message")?;
    assert!(message.starts_with("Account locked"), "{message}");
    assert!(message.contains("15 minutes"), "{message}");
    assert_eq!(h.notifier.lockout_count(), 1);

    let correct = json!({ "username": "bob", "password": "B0b-pass" });
    let (status, body) = login(&h.app, correct.clone()).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["code"], "account_locked");
    assert!(body["locked_until"].as_u64().is_some_and(|left| left <= 900));

    h.clock.advance(901);
    let (status, body) = login(&h.app, correct).await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Counters were cleared by the success.
    let (status, body) = login(&h.app, wrong).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["attempts"], 1);
    Ok(())
}

#[tokio::test]
async fn refresh_rotation_and_reuse() -> Result<()> {
    let h = harness(base_config())?;
    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let r1 = token_field(&body, "refresh_token")?.to_string();
    let r1_claims = claims(&r1)?;

    h.clock.advance(60);
    let (status, body) = send(
        &h.app,
        Method::POST,
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": r1 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let a2 = token_field(&body, "access_token")?.to_string();
    let r2_claims = claims(token_field(&body, "refresh_token")?)?;
    assert_eq!(r2_claims["login_time"], r1_claims["login_time"]);
    assert_eq!(r1_claims["login_time"], START);
    assert_ne!(r2_claims["jti"], r1_claims["jti"]);

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": r1 })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid refresh token");

    let (status, body) = send(&h.app, Method::GET, "/auth/verify", Some(&a2), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    Ok(())
}

#[tokio::test]
async fn absolute_session_timeout_survives_refresh() -> Result<()> {
    let h = harness(base_config())?;
    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let r1 = token_field(&body, "refresh_token")?.to_string();

    h.clock.advance(3000);
    let (status, body) = send(
        &h.app,
        Method::POST,
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": r1 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let a2 = token_field(&body, "access_token")?.to_string();

    h.clock.set(START + 3590);
    let (status, _) = send(&h.app, Method::GET, "/auth/verify", Some(&a2), None).await?;
    assert_eq!(status, StatusCode::OK);

    h.clock.set(START + 3610);
    let (status, body) = send(&h.app, Method::GET, "/auth/verify", Some(&a2), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "session_expired");
    Ok(())
}

#[tokio::test]
async fn cross_tenant_record_is_not_found() -> Result<()> {
    let h = harness(base_config())?;
    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let access = token_field(&body, "access_token")?.to_string();

    let (status, body) = send(&h.app, Method::GET, "/resource/42", Some(&access), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let rendered = body.to_string();
    assert!(!rendered.contains("tenant-nine-secret-plan"));
    assert!(!rendered.contains("someone else"));

    let (status, body) = send(&h.app, Method::GET, "/resource/7", Some(&access), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["name"], "own-record");

    let (status, body) = send(&h.app, Method::GET, "/resource", Some(&access), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn created_record_is_stamped_with_callers_tenant() -> Result<()> {
    let h = harness(base_config())?;
    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let access = token_field(&body, "access_token")?.to_string();

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/resource",
        Some(&access),
        Some(json!({ "name": "risk register", "data": { "level": "high" } })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["tenant_id"], 7);

    let (status, _) = send(&h.app, Method::DELETE, "/resource/42", Some(&access), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn mfa_pivot_and_exhaustion() -> Result<()> {
    let h = harness(base_config().with_mfa(true).with_mfa_max_attempts(3))?;

    let (status, body) = login(&h.app, json!({ "username": "carol", "password": "C@rol1" })).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "mfa_required");
    assert_eq!(body["email_masked"], "a***@b.com");
    assert!(body.get("access_token").is_none());

    let code = h.notifier.last_code()?;
    let (status, body) = send(
        &h.app,
        Method::POST,
        "/auth/mfa/verify",
        None,
        Some(json!({ "username": "carol", "code": code })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    token_field(&body, "access_token")?;
    token_field(&body, "refresh_token")?;

    // A fresh challenge, then three wrong codes.
    let (_, body) = login(&h.app, json!({ "username": "carol", "password": "C@rol1" })).await?;
    assert_eq!(body["status"], "mfa_required");
    let code = h.notifier.last_code()?;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for expected_left in [2u64, 1, 0] {
        let (status, body) = send(
            &h.app,
            Method::POST,
            "/auth/mfa/verify",
            None,
            Some(json!({ "username": "carol", "code": wrong })),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
        assert_eq!(body["code"], "mfa_failed");
        assert_eq!(body["requires_mfa"], true);
        assert_eq!(body["remaining_attempts"], expected_left);
    }

    // Exhausted: even the right code gets the generic failure.
    let (status, body) = send(
        &h.app,
        Method::POST,
        "/auth/mfa/verify",
        None,
        Some(json!({ "username": "carol", "code": code })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "mfa_failed");
    assert_eq!(body["message"], "Verification failed");
    assert!(body.get("remaining_attempts").is_none());
    Ok(())
}

#[tokio::test]
async fn mfa_resend_within_ttl_is_throttled() -> Result<()> {
    let h = harness(base_config().with_mfa(true))?;
    login(&h.app, json!({ "username": "carol", "password": "C@rol1" })).await?;

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/auth/mfa/resend",
        None,
        Some(json!({ "email": "a@b.com" })),
    )
    .await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
    assert_eq!(body["email_masked"], "a***@b.com");

    h.clock.advance(301);
    let (status, body) = send(
        &h.app,
        Method::POST,
        "/auth/mfa/resend",
        None,
        Some(json!({ "email": "a@b.com" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["email_masked"], "a***@b.com");
    Ok(())
}

#[tokio::test]
async fn logout_retires_refresh_token_and_session() -> Result<()> {
    let h = harness(base_config())?;
    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let access = token_field(&body, "access_token")?.to_string();
    let refresh = token_field(&body, "refresh_token")?.to_string();

    let (status, _) = send(
        &h.app,
        Method::POST,
        "/auth/logout",
        Some(&access),
        Some(json!({ "refresh_token": refresh })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &h.app,
        Method::POST,
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.app, Method::GET, "/auth/verify", Some(&access), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn newer_login_invalidates_older_session() -> Result<()> {
    let h = harness(base_config())?;
    let credentials = json!({ "username": "alice", "password": "P@ss1" });
    let (_, first) = login(&h.app, credentials.clone()).await?;
    let first_access = token_field(&first, "access_token")?.to_string();
    let (_, second) = login(&h.app, credentials).await?;
    let second_access = token_field(&second, "access_token")?.to_string();

    let (status, body) =
        send(&h.app, Method::GET, "/auth/verify", Some(&first_access), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "session_invalidated");

    let (status, _) = send(&h.app, Method::GET, "/auth/verify", Some(&second_access), None).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn responses_carry_hardening_and_request_id() -> Result<()> {
    let h = harness(base_config())?;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/auth/version")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())?;
    let response = h.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );
    assert!(headers[header::CACHE_CONTROL]
        .to_str()?
        .starts_with("no-store"));
    Ok(())
}

#[tokio::test]
async fn health_reports_disabled_database() -> Result<()> {
    let h = harness(base_config())?;
    let (status, body) = send(&h.app, Method::GET, "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "custodia");
    assert_eq!(body["database"], "disabled");
    Ok(())
}

#[tokio::test]
async fn refresh_is_rate_limited_per_address() -> Result<()> {
    let h = harness(base_config().with_refresh_ip_limit(2))?;
    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let refresh = token_field(&body, "refresh_token")?.to_string();

    for _ in 0..2 {
        let (status, body) = refresh_from(&h.app, CLIENT, "not-a-token").await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
    }

    // The budget is spent before the token is even looked at.
    let (status, body) = refresh_from(&h.app, CLIENT, &refresh).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
    assert_eq!(body["code"], "rate_limited");

    let (status, body) = refresh_from(&h.app, "198.51.100.20:5000", &refresh).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    Ok(())
}

#[tokio::test]
async fn raised_version_floor_demands_upgrade_on_admitted_routes() -> Result<()> {
    let floor = Arc::new(MovableFloor::at("1.0.0")?);
    let source = floor.clone();
    let h = harness_with(base_config(), move |backends| backends.versions = source)?;

    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let access = token_field(&body, "access_token")?.to_string();
    assert_eq!(claims(&access)?["ver"], "1.0.0");

    let (status, _) = send(&h.app, Method::GET, "/auth/verify", Some(&access), None).await?;
    assert_eq!(status, StatusCode::OK);

    floor.raise_to("2.0.0")?;
    let (status, body) = send(&h.app, Method::GET, "/auth/verify", Some(&access), None).await?;
    assert_eq!(status, StatusCode::UPGRADE_REQUIRED, "{body}");
    assert_eq!(body["code"], "upgrade_required");
    assert_eq!(body["min_supported_version"], "2.0.0");
    assert_eq!(body["token_version"], "1.0.0");

    let (status, _) = send(&h.app, Method::GET, "/resource", Some(&access), None).await?;
    assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
    Ok(())
}

#[tokio::test]
async fn concurrent_refreshes_of_one_token_rotate_once() -> Result<()> {
    let h = harness_with(base_config(), |backends| {
        backends.store = Arc::new(YieldingStore(MemoryStore::new(backends.clock.clone())));
    })?;
    let (_, body) = login(&h.app, json!({ "username": "alice", "password": "P@ss1" })).await?;
    let refresh = token_field(&body, "refresh_token")?.to_string();

    let (first, second) = tokio::join!(
        refresh_from(&h.app, CLIENT, &refresh),
        refresh_from(&h.app, CLIENT, &refresh)
    );
    let mut statuses = [first?.0, second?.0];
    statuses.sort_by_key(StatusCode::as_u16);
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);
    Ok(())
}

#[tokio::test]
async fn forged_forwarding_headers_do_not_escape_the_login_limit() -> Result<()> {
    let h = harness(base_config().with_ip_login_limit(3))?;

    for hop in 1..=3 {
        let (status, body) = forwarded_login(
            &h.app,
            CLIENT,
            &format!("192.0.2.{hop}"),
            json!({ "username": format!("ghost{hop}"), "password": "x" }),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
    }

    let (status, body) = forwarded_login(
        &h.app,
        CLIENT,
        "192.0.2.99",
        json!({ "username": "alice", "password": "P@ss1" }),
    )
    .await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_forwards_distinct_clients() -> Result<()> {
    let proxy: IpAddr = "10.0.0.1".parse()?;
    let h = harness(
        base_config()
            .with_ip_login_limit(2)
            .with_trusted_proxies(vec![proxy]),
    )?;
    let wrong = json!({ "username": "ghost", "password": "x" });

    for _ in 0..2 {
        let (status, _) = forwarded_login(&h.app, PROXY, "192.0.2.1, 198.51.100.7", wrong.clone()).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = forwarded_login(&h.app, PROXY, "198.51.100.7", wrong.clone()).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Only the rightmost untrusted hop counts, so a client prepending hops
    // does not get a fresh bucket.
    let (status, _) = forwarded_login(&h.app, PROXY, "192.0.2.200, 198.51.100.7", wrong.clone()).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, body) = forwarded_login(
        &h.app,
        PROXY,
        "198.51.100.8",
        json!({ "username": "alice", "password": "P@ss1" }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    Ok(())
}
