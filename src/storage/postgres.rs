use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Connection, PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
    types::Json,
};
use std::time::Duration;
use tracing::{Instrument, info_span};

use super::{CreateUserOutcome, NavInput, NavItem, NewUser, SessionRecord, Storage, User};

pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str =
    "id, username, email, phone, password, profile, created_at, updated_at";

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database using the DSN.
    ///
    /// # Errors
    /// Returns an error if no connection can be established.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes when missing.
    ///
    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn apply_schema(&self) -> Result<()> {
        let span = info_span!("db.migrate", db.system = "postgresql");
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply schema")?;
        Ok(())
    }
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let Json(profile): Json<Value> = row.try_get("profile")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password")?,
        profile,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn nav_from_row(row: &PgRow) -> Result<NavItem> {
    Ok(NavItem {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parent_id: row.try_get("parent_id")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

impl PgStorage {
    async fn find_user_where(&self, column: &'static str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .with_context(|| format!("failed to lookup user by {column}"))?;
        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("Failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("Failed to ping database")
    }

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome> {
        let query = format!(
            "INSERT INTO users (username, email, phone, password, profile) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(user.username)
            .bind(user.email)
            .bind(user.phone)
            .bind(user.password_hash)
            .bind(Json(user.profile))
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await;

        match row {
            Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user_where("email", email).await
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>> {
        self.find_user_where("phone", phone).await
    }

    async fn list_users(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64)> {
        let count_query = "SELECT COUNT(*) AS total FROM users";
        let total: i64 = sqlx::query(count_query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", count_query))
            .await
            .context("failed to count users")?
            .try_get("total")?;

        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC OFFSET $1 LIMIT $2");
        let rows = sqlx::query(&query)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to list users")?;
        let users = rows.iter().map(user_from_row).collect::<Result<Vec<_>>>()?;
        Ok((users, total))
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        // user_sessions rows go with the user via ON DELETE CASCADE
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        let query = "UPDATE users SET password = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_profile(
        &self,
        id: i64,
        username: Option<&str>,
        profile: &Value,
    ) -> Result<Option<User>> {
        let query = format!(
            "UPDATE users SET username = COALESCE($2, username), profile = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(username)
            .bind(Json(profile))
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .context("failed to update profile")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_session(
        &self,
        user_id: i64,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        if chrono::Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
            .is_none()
        {
            anyhow::bail!("session ttl out of range: {ttl_seconds}s");
        }

        let prune = "DELETE FROM user_sessions WHERE expires_at <= NOW()";
        sqlx::query(prune)
            .execute(&self.pool)
            .instrument(query_span("DELETE", prune))
            .await
            .context("failed to prune expired sessions")?;

        let query = r"
            INSERT INTO user_sessions (session_hash, user_id, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT user_id, expires_at
            FROM user_sessions
            WHERE session_hash = $1 AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session")?;

        row.map(|row| {
            Ok(SessionRecord {
                user_id: row.try_get("user_id")?,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM user_sessions WHERE session_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn delete_other_sessions(&self, user_id: i64, keep: &[u8]) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE user_id = $1 AND session_hash <> $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(keep)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to revoke sessions")?;
        Ok(result.rows_affected())
    }

    async fn list_nav(&self) -> Result<Vec<NavItem>> {
        let query = "SELECT id, name, description, parent_id FROM nav ORDER BY id ASC";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list nav")?;
        rows.iter().map(nav_from_row).collect()
    }

    async fn find_nav(&self, id: i64) -> Result<Option<NavItem>> {
        let query = "SELECT id, name, description, parent_id FROM nav WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup nav")?;
        row.as_ref().map(nav_from_row).transpose()
    }

    async fn insert_nav(&self, input: NavInput) -> Result<NavItem> {
        let query = r"
            INSERT INTO nav (name, description, parent_id)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, parent_id
        ";
        let row = sqlx::query(query)
            .bind(input.name)
            .bind(input.description)
            .bind(input.parent_id)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert nav")?;
        nav_from_row(&row)
    }

    async fn update_nav(&self, id: i64, input: NavInput) -> Result<Option<NavItem>> {
        let query = r"
            UPDATE nav
            SET name = $2, description = $3, parent_id = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, parent_id
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(input.name)
            .bind(input.description)
            .bind(input.parent_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update nav")?;
        row.as_ref().map(nav_from_row).transpose()
    }

    async fn delete_nav(&self, ids: &[i64]) -> Result<u64> {
        let query = "DELETE FROM nav WHERE id = ANY($1)";
        let result = sqlx::query(query)
            .bind(ids)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete nav")?;
        Ok(result.rows_affected())
    }
}
