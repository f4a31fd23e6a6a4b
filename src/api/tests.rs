//! Router tests against in-memory storage.

use super::app;
use super::handlers::auth::{AuthConfig, AuthState};
use crate::crypto::generate_api_key;
use crate::otp::{LogOtpSender, OtpChannel, OtpConfig, OtpMessage, OtpSender, OtpState};
use crate::storage::{DynStorage, MemoryStorage};
use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const FIXED_CODE: &str = "666666";
const PASSWORD: &str = "IDecs@2020";

fn test_app(config: AuthConfig) -> Result<Router> {
    let storage: DynStorage = Arc::new(MemoryStorage::new());
    let otp = Arc::new(OtpState::new(
        OtpConfig::new().with_fixed_code(Some(FIXED_CODE.to_string())),
        Arc::new(LogOtpSender),
    ));
    app(storage, Arc::new(AuthState::new(config)), otp)
}

fn unsigned_config() -> AuthConfig {
    AuthConfig::new("http://localhost:3000".to_string()).with_request_signing(false)
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    fn code(&self) -> i64 {
        self.body["head"]["code"].as_i64().unwrap_or(-1)
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Reply> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("token={token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(Reply {
        status,
        headers,
        body,
    })
}

async fn signup(app: &Router, email: &str) -> Result<Reply> {
    send(
        app,
        Method::POST,
        "/api/user/signup",
        None,
        Some(json!({
            "email": email,
            "code": FIXED_CODE,
            "password": PASSWORD,
            "confirmPassword": PASSWORD,
            "profile": {"username": "IDecs_tester"}
        })),
    )
    .await
}

async fn login(app: &Router, identity: &str, password: &str) -> Result<Reply> {
    send(
        app,
        Method::POST,
        "/api/user/login",
        None,
        Some(json!({"identity": identity, "password": password, "type": "PASSWORD"})),
    )
    .await
}

/// Login and redeem the ticket, returning the session token.
async fn session_token(app: &Router, identity: &str, password: &str) -> Result<String> {
    let reply = login(app, identity, password).await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    let ticket = reply.body["data"]["ticket"]
        .as_str()
        .context("missing ticket")?
        .to_string();

    let reply = send(
        app,
        Method::GET,
        &format!("/api/user/ticket/validate?ticket={ticket}"),
        None,
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    Ok(reply.body["data"]["token"]
        .as_str()
        .context("missing token")?
        .to_string())
}

#[tokio::test]
async fn signup_login_ticket_and_profile_flow() -> Result<()> {
    let app = test_app(unsigned_config())?;

    let reply = send(
        &app,
        Method::POST,
        "/api/otp/email",
        None,
        Some(json!({"email": "tester@idecs.com"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.code(), 0);

    let reply = signup(&app, "tester@idecs.com").await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["data"]["email"], "tester@idecs.com");
    assert_eq!(reply.body["data"]["username"], "IDecs_tester");
    assert!(reply.body["data"].get("password").is_none());

    let reply = signup(&app, "Tester@IDecs.com").await?;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.code(), 40900);

    let reply = login(&app, "tester@idecs.com", PASSWORD).await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    let ticket = reply.body["data"]["ticket"]
        .as_str()
        .context("missing ticket")?
        .to_string();

    let uri = format!("/api/user/ticket/validate?ticket={ticket}");
    let reply = send(&app, Method::GET, &uri, None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    let token = reply.body["data"]["token"]
        .as_str()
        .context("missing token")?
        .to_string();
    let cookie = reply
        .headers
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(cookie.starts_with(&format!("token={token};")));
    assert!(cookie.contains("HttpOnly"));

    // Tickets are single use.
    let reply = send(&app, Method::GET, &uri, None, None).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), 40103);

    let reply = send(&app, Method::GET, "/api/user", Some(&token), None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["email"], "tester@idecs.com");

    let reply = send(
        &app,
        Method::PUT,
        "/api/user/profile",
        Some(&token),
        Some(json!({"username": "haha", "profile": {"test": "prefect"}})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["username"], "haha");
    assert_eq!(
        reply.body["data"]["profile"],
        json!({"username": "IDecs_tester", "test": "prefect"})
    );

    let reply = send(&app, Method::POST, "/api/user/logout", Some(&token), None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = send(&app, Method::GET, "/api/user", Some(&token), None).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), 40100);
    Ok(())
}

#[tokio::test]
async fn signup_rejects_policy_mismatch_and_bad_code() -> Result<()> {
    let app = test_app(unsigned_config())?;

    let mut body = json!({
        "phone": "13800138000",
        "code": FIXED_CODE,
        "password": "weak",
        "confirmPassword": "weak"
    });
    let reply = send(&app, Method::POST, "/api/user/signup", None, Some(body.clone())).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 40002);

    body["password"] = json!(PASSWORD);
    body["confirmPassword"] = json!("IDecs@2021");
    let reply = send(&app, Method::POST, "/api/user/signup", None, Some(body.clone())).await?;
    assert_eq!(reply.code(), 40003);

    body["confirmPassword"] = json!(PASSWORD);
    body["code"] = json!("000000");
    let reply = send(&app, Method::POST, "/api/user/signup", None, Some(body.clone())).await?;
    assert_eq!(reply.code(), 40001);

    body["code"] = json!(FIXED_CODE);
    let reply = send(&app, Method::POST, "/api/user/signup", None, Some(body)).await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["data"]["phone"], "13800138000");

    let reply = send(
        &app,
        Method::POST,
        "/api/user/signup",
        None,
        Some(json!({"code": FIXED_CODE, "password": PASSWORD, "confirmPassword": PASSWORD})),
    )
    .await?;
    assert_eq!(reply.code(), 40000);

    let reply = send(&app, Method::POST, "/api/user/signup", None, Some(json!([]))).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 40000);
    Ok(())
}

#[tokio::test]
async fn login_failures_share_one_code() -> Result<()> {
    let app = test_app(unsigned_config())?;
    signup(&app, "tester@idecs.com").await?;

    let reply = login(&app, "tester@idecs.com", "IDecs@2021").await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), 40104);

    let reply = login(&app, "nobody@idecs.com", PASSWORD).await?;
    assert_eq!(reply.code(), 40104);

    let reply = send(
        &app,
        Method::POST,
        "/api/user/login",
        None,
        Some(json!({"identity": "tester@idecs.com", "code": FIXED_CODE, "type": "OTP"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::CREATED);

    let reply = send(
        &app,
        Method::POST,
        "/api/user/login",
        None,
        Some(json!({"identity": "nobody@idecs.com", "code": FIXED_CODE, "type": "OTP"})),
    )
    .await?;
    assert_eq!(reply.code(), 40104);

    let reply = send(
        &app,
        Method::GET,
        "/api/user/ticket/validate?ticket=bogus",
        None,
        None,
    )
    .await?;
    assert_eq!(reply.code(), 40103);
    Ok(())
}

#[tokio::test]
async fn password_change_revokes_other_sessions() -> Result<()> {
    let app = test_app(unsigned_config())?;
    signup(&app, "tester@idecs.com").await?;
    let first = session_token(&app, "tester@idecs.com", PASSWORD).await?;
    let second = session_token(&app, "tester@idecs.com", PASSWORD).await?;

    let reply = send(
        &app,
        Method::PUT,
        "/api/user/password/change",
        Some(&first),
        Some(json!({
            "oldPassword": "wrong",
            "newPassword": "IDecs@2021",
            "confirmPassword": "IDecs@2021"
        })),
    )
    .await?;
    assert_eq!(reply.code(), 40104);

    let reply = send(
        &app,
        Method::PUT,
        "/api/user/password/change",
        Some(&first),
        Some(json!({
            "oldPassword": PASSWORD,
            "newPassword": "IDecs@2021",
            "confirmPassword": "IDecs@2021"
        })),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(&app, Method::GET, "/api/user", Some(&first), None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = send(&app, Method::GET, "/api/user", Some(&second), None).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    assert_eq!(login(&app, "tester@idecs.com", PASSWORD).await?.code(), 40104);
    assert_eq!(
        login(&app, "tester@idecs.com", "IDecs@2021").await?.status,
        StatusCode::CREATED
    );
    Ok(())
}

#[tokio::test]
async fn users_pagination_lookup_and_delete() -> Result<()> {
    let app = test_app(unsigned_config())?;
    for i in 0..3 {
        signup(&app, &format!("user{i}@idecs.com")).await?;
    }
    let token = session_token(&app, "user0@idecs.com", PASSWORD).await?;

    let reply = send(&app, Method::GET, "/api/user/pagination?page=1&size=2", None, None).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = send(
        &app,
        Method::GET,
        "/api/user/pagination?page=2&size=2",
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["total"], 3);
    assert_eq!(reply.body["data"]["page"], 2);
    assert_eq!(reply.body["data"]["items"][0]["email"], "user2@idecs.com");

    let reply = send(&app, Method::GET, "/api/user/2", Some(&token), None).await?;
    assert_eq!(reply.body["data"]["email"], "user1@idecs.com");

    let reply = send(&app, Method::GET, "/api/user/abc", Some(&token), None).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = send(&app, Method::DELETE, "/api/user/2", Some(&token), None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = send(&app, Method::DELETE, "/api/user/2", Some(&token), None).await?;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 40400);
    Ok(())
}

#[tokio::test]
async fn nav_tree_crud() -> Result<()> {
    let app = test_app(unsigned_config())?;
    signup(&app, "tester@idecs.com").await?;
    let token = session_token(&app, "tester@idecs.com", PASSWORD).await?;

    let create = |name: &str, parent: i64| {
        Some(json!({"name": name, "description": "", "parentId": parent}))
    };

    let reply = send(&app, Method::POST, "/api/nav", Some(&token), create("Home", 0)).await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    let home = reply.body["data"]["id"].as_i64().context("missing id")?;

    let reply = send(&app, Method::POST, "/api/nav", Some(&token), create("Users", home)).await?;
    let users = reply.body["data"]["id"].as_i64().context("missing id")?;

    let reply = send(&app, Method::POST, "/api/nav", Some(&token), create("Ghost", 999)).await?;
    assert_eq!(reply.code(), 40000);

    let reply = send(
        &app,
        Method::PUT,
        &format!("/api/nav/{home}"),
        Some(&token),
        create("Home", users),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = send(&app, Method::GET, "/api/nav", Some(&token), None).await?;
    assert_eq!(reply.body["data"][0]["name"], "Home");
    assert_eq!(reply.body["data"][0]["children"][0]["name"], "Users");

    let reply = send(&app, Method::DELETE, &format!("/api/nav/{home}"), Some(&token), None).await?;
    assert_eq!(reply.body["data"]["deleted"], 2);
    let reply = send(&app, Method::GET, "/api/nav", Some(&token), None).await?;
    assert_eq!(reply.body["data"], json!([]));
    Ok(())
}

#[tokio::test]
async fn otp_cooldown_and_verify() -> Result<()> {
    let app = test_app(unsigned_config())?;
    let body = json!({"phone": "13800138000"});
    let reply = send(&app, Method::POST, "/api/otp/sms", None, Some(body.clone())).await?;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = send(&app, Method::POST, "/api/otp/sms", None, Some(body)).await?;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.code(), 42900);

    let reply = send(
        &app,
        Method::POST,
        "/api/otp/sms/verify",
        None,
        Some(json!({"phone": "13800138000", "code": FIXED_CODE})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(
        &app,
        Method::POST,
        "/api/otp/email/verify",
        None,
        Some(json!({"email": "tester@idecs.com", "code": "000000"})),
    )
    .await?;
    assert_eq!(reply.code(), 40001);
    Ok(())
}

#[tokio::test]
async fn signing_guards_api_but_not_health() -> Result<()> {
    let app = test_app(AuthConfig::new("http://localhost:3000".to_string()))?;

    let reply = send(&app, Method::GET, "/api/user", None, None).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), 40101);

    let reply = send(&app, Method::GET, "/health", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.headers.contains_key("x-request-id"));

    let reply = send(&app, Method::GET, "/openapi.json", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["paths"]["/api/user/signup"].is_object());

    let now = chrono::Utc::now().timestamp_millis();
    let request = Request::builder()
        .uri("/api/user")
        .header("timestamp", now.to_string())
        .header("api-key", generate_api_key(now, "/api/user", "")?)
        .body(Body::empty())?;
    let response = app.clone().oneshot(request).await?;
    // Signature accepted; the missing session is what fails now.
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["head"]["code"], 40100);
    Ok(())
}

#[tokio::test]
async fn out_of_range_session_ttl_fails_without_panicking() -> Result<()> {
    let app = test_app(unsigned_config().with_session_ttl_seconds(i64::MAX))?;
    signup(&app, "tester@idecs.com").await?;

    let reply = login(&app, "tester@idecs.com", PASSWORD).await?;
    let ticket = reply.body["data"]["ticket"]
        .as_str()
        .context("missing ticket")?
        .to_string();
    let reply = send(
        &app,
        Method::GET,
        &format!("/api/user/ticket/validate?ticket={ticket}"),
        None,
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.code(), 50000);
    assert!(reply.headers.get(header::SET_COOKIE).is_none());
    Ok(())
}

#[derive(Default)]
struct RecordingSender {
    codes: std::sync::Mutex<Vec<String>>,
}

impl RecordingSender {
    fn last_code(&self) -> Option<String> {
        self.codes.lock().ok().and_then(|codes| codes.last().cloned())
    }
}

#[async_trait::async_trait]
impl OtpSender for RecordingSender {
    async fn send(&self, message: &OtpMessage) -> Result<()> {
        self.codes
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push(message.code.clone());
        Ok(())
    }
}

#[tokio::test]
async fn duplicate_signup_keeps_the_code() -> Result<()> {
    let sender = Arc::new(RecordingSender::default());
    let otp = Arc::new(OtpState::new(
        OtpConfig::new().with_resend_cooldown_seconds(0),
        sender.clone(),
    ));
    let storage: DynStorage = Arc::new(MemoryStorage::new());
    let app = app(
        storage,
        Arc::new(AuthState::new(unsigned_config())),
        otp.clone(),
    )?;

    let email = "tester@idecs.com";
    let mut body = json!({
        "email": email,
        "password": PASSWORD,
        "confirmPassword": PASSWORD
    });
    for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
        let reply = send(
            &app,
            Method::POST,
            "/api/otp/email",
            None,
            Some(json!({"email": email})),
        )
        .await?;
        assert_eq!(reply.status, StatusCode::OK);
        body["code"] = json!(sender.last_code().context("no code sent")?);

        let reply = send(&app, Method::POST, "/api/user/signup", None, Some(body.clone())).await?;
        assert_eq!(reply.status, expected);
    }

    let code = sender.last_code().context("no code sent")?;
    assert!(otp.verify(OtpChannel::Email, email, &code).await);
    Ok(())
}
