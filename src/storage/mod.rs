//! Persistence for users, sessions and navigation entries.
//!
//! Handlers only see the [`Storage`] trait. `PgStorage` is the production
//! backend; `MemoryStorage` keeps everything in process for development and tests.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

pub type DynStorage = Arc<dyn Storage>;

#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub profile: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub profile: Value,
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    Conflict,
}

/// Minimal data returned for a valid session token.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavItem {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub parent_id: i64,
}

#[derive(Clone, Debug)]
pub struct NavInput {
    pub name: String,
    pub description: String,
    pub parent_id: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Cheap liveness probe for `/health`.
    async fn ping(&self) -> Result<()>;

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome>;
    async fn find_user(&self, id: i64) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>>;
    /// Users ordered by id, plus the total count.
    async fn list_users(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64)>;
    /// Deletes the user and every session they own.
    async fn delete_user(&self, id: i64) -> Result<bool>;
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool>;
    async fn update_profile(
        &self,
        id: i64,
        username: Option<&str>,
        profile: &Value,
    ) -> Result<Option<User>>;

    async fn insert_session(&self, user_id: i64, token_hash: &[u8], ttl_seconds: i64)
    -> Result<()>;
    /// Only unexpired sessions are returned.
    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;
    async fn delete_session(&self, token_hash: &[u8]) -> Result<()>;
    /// Revoke every session of `user_id` except the one identified by `keep`.
    async fn delete_other_sessions(&self, user_id: i64, keep: &[u8]) -> Result<u64>;

    async fn list_nav(&self) -> Result<Vec<NavItem>>;
    async fn find_nav(&self, id: i64) -> Result<Option<NavItem>>;
    async fn insert_nav(&self, input: NavInput) -> Result<NavItem>;
    async fn update_nav(&self, id: i64, input: NavInput) -> Result<Option<NavItem>>;
    async fn delete_nav(&self, ids: &[i64]) -> Result<u64>;
}
