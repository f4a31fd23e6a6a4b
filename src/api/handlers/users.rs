//! User lookup, listing, deletion, password change and profile updates.
//!
//! Every route here requires a session; see [`super::auth::principal`].

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::auth::{AuthState, principal::require_auth};
use crate::api::error::{ApiError, ResponseCode, respond, respond_empty};
use crate::crypto::{hash_password_async, verify_password_async};
use crate::storage::{DynStorage, User};
use crate::validation::valid_username;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

/// Public view of a user; the password hash is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[schema(value_type = Object)]
    pub profile: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            phone: user.phone,
            profile: user.profile,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationQuery {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Page size, clamped to 1..=100.
    pub size: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserPage {
    pub items: Vec<UserView>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
    /// Keys are merged into the stored profile; `null` removes a key.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub profile: Option<Map<String, Value>>,
}

#[utoipa::path(
    get,
    path = "/api/user",
    responses(
        (status = 200, description = "The authenticated user", body = UserView),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "user"
)]
pub async fn current_user(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &storage).await?;
    let user = load_user(&storage, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::from_code(ResponseCode::Unauthorized))?;
    Ok(respond(StatusCode::OK, UserView::from(user)))
}

#[utoipa::path(
    get,
    path = "/api/user/{id}",
    params(
        ("id" = i64, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User detail", body = UserView),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "User not found")
    ),
    tag = "user"
)]
pub async fn get_user(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &storage).await?;
    let Path(id) = id?;
    let user = load_user(&storage, id)
        .await?
        .ok_or_else(|| ApiError::from_code(ResponseCode::NotFound))?;
    Ok(respond(StatusCode::OK, UserView::from(user)))
}

#[utoipa::path(
    delete,
    path = "/api/user/{id}",
    params(
        ("id" = i64, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User and their sessions deleted"),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "User not found")
    ),
    tag = "user"
)]
pub async fn delete_user(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &storage).await?;
    let Path(id) = id?;
    let deleted = storage
        .delete_user(id)
        .await
        .map_err(|err| ApiError::internal("Failed to delete user", err))?;
    if !deleted {
        return Err(ResponseCode::NotFound.into());
    }
    info!(user_id = id, by = principal.user_id, "user deleted");
    Ok(respond_empty())
}

#[utoipa::path(
    get,
    path = "/api/user/pagination",
    params(PaginationQuery),
    responses(
        (status = 200, description = "Users ordered by id", body = UserPage),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "user"
)]
pub async fn list_users(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    query: Result<Query<PaginationQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &storage).await?;
    let Query(query) = query?;
    let (page, size) = page_bounds(&query);

    let (users, total) = storage
        .list_users((page - 1).saturating_mul(size), size)
        .await
        .map_err(|err| ApiError::internal("Failed to list users", err))?;

    Ok(respond(
        StatusCode::OK,
        UserPage {
            items: users.into_iter().map(UserView::from).collect(),
            total,
            page,
            size,
        },
    ))
}

#[utoipa::path(
    put,
    path = "/api/user/password/change",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; other sessions revoked"),
        (status = 400, description = "Policy or confirmation failure"),
        (status = 401, description = "Missing session or wrong old password")
    ),
    tag = "user"
)]
pub async fn change_password(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &storage).await?;
    let Json(request) = payload?;

    let user = load_user(&storage, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::from_code(ResponseCode::Unauthorized))?;

    let matches = verify_password_async(request.old_password, user.password_hash)
        .await
        .map_err(|err| ApiError::internal("Failed to verify password", err))?;
    if !matches {
        return Err(ResponseCode::CredentialsInvalid.into());
    }

    auth_state
        .config()
        .password_policy()
        .check(&request.new_password)
        .map_err(|err| ApiError::new(ResponseCode::PasswordPolicy, err.to_string()))?;
    if request.new_password != request.confirm_password {
        return Err(ResponseCode::PasswordMismatch.into());
    }

    let password_hash = hash_password_async(request.new_password)
        .await
        .map_err(|err| ApiError::internal("Failed to hash password", err))?;
    let updated = storage
        .update_password(user.id, &password_hash)
        .await
        .map_err(|err| ApiError::internal("Failed to update password", err))?;
    if !updated {
        return Err(ResponseCode::Unauthorized.into());
    }

    let revoked = storage
        .delete_other_sessions(user.id, &principal.token_hash)
        .await
        .map_err(|err| ApiError::internal("Failed to revoke sessions", err))?;
    info!(user_id = user.id, revoked, "password changed");
    Ok(respond_empty())
}

#[utoipa::path(
    put,
    path = "/api/user/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated user", body = UserView),
        (status = 400, description = "Invalid username"),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "user"
)]
pub async fn update_profile(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &storage).await?;
    let Json(request) = payload?;

    let username = match request.username.as_deref().map(str::trim) {
        Some(name) if !valid_username(name) => return Err(ApiError::invalid("Invalid username")),
        other => other,
    };

    let user = load_user(&storage, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::from_code(ResponseCode::Unauthorized))?;
    let profile = merge_profile(user.profile, request.profile.unwrap_or_default());

    let updated = storage
        .update_profile(user.id, username, &profile)
        .await
        .map_err(|err| ApiError::internal("Failed to update profile", err))?
        .ok_or_else(|| ApiError::from_code(ResponseCode::Unauthorized))?;
    Ok(respond(StatusCode::OK, UserView::from(updated)))
}

async fn load_user(storage: &DynStorage, id: i64) -> Result<Option<User>, ApiError> {
    storage
        .find_user(id)
        .await
        .map_err(|err| ApiError::internal("Failed to lookup user", err))
}

fn page_bounds(query: &PaginationQuery) -> (i64, i64) {
    let page = query.page.unwrap_or(1).max(1);
    let size = query
        .size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, size)
}

/// Shallow merge: top-level keys replace stored ones, `null` deletes.
fn merge_profile(current: Value, changes: Map<String, Value>) -> Value {
    let mut merged = match current {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in changes {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_bounds_clamp() {
        let query = |page, size| PaginationQuery { page, size };
        assert_eq!(page_bounds(&query(None, None)), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(page_bounds(&query(Some(0), Some(0))), (1, 1));
        assert_eq!(page_bounds(&query(Some(-3), Some(1000))), (1, MAX_PAGE_SIZE));
        assert_eq!(page_bounds(&query(Some(4), Some(25))), (4, 25));
    }

    #[test]
    fn merge_profile_is_shallow_and_null_deletes() {
        let current = json!({"username": "IDecs_tester", "theme": {"dark": true}, "lang": "en"});
        let changes = json!({"theme": {"contrast": "high"}, "lang": null, "test": "prefect"});
        let Value::Object(changes) = changes else {
            unreachable!("literal is an object");
        };
        assert_eq!(
            merge_profile(current, changes),
            json!({"username": "IDecs_tester", "theme": {"contrast": "high"}, "test": "prefect"})
        );
    }

    #[test]
    fn merge_profile_replaces_non_object() {
        let mut changes = Map::new();
        changes.insert("a".to_string(), json!(1));
        assert_eq!(merge_profile(json!("junk"), changes), json!({"a": 1}));
    }

    #[test]
    fn user_view_is_camel_case_without_password() -> anyhow::Result<()> {
        let now = Utc::now();
        let view = UserView::from(User {
            id: 1,
            username: None,
            email: Some("a@example.com".to_string()),
            phone: None,
            password_hash: "scrypt$00$00".to_string(),
            profile: json!({}),
            created_at: now,
            updated_at: now,
        });
        let value = serde_json::to_value(&view)?;
        assert!(value.get("createdAt").is_some());
        assert!(value.get("password").is_none());
        assert!(value.get("passwordHash").is_none());
        Ok(())
    }
}
