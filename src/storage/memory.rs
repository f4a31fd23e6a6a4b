use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{CreateUserOutcome, NavInput, NavItem, NewUser, SessionRecord, Storage, User};

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, User>,
    next_user_id: i64,
    sessions: HashMap<Vec<u8>, SessionRecord>,
    nav: BTreeMap<i64, NavItem>,
    next_nav_id: i64,
}

/// In-process storage, lost on restart.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome> {
        let mut inner = self.inner.write().await;
        let taken = inner.users.values().any(|existing| {
            (user.email.is_some() && existing.email == user.email)
                || (user.phone.is_some() && existing.phone == user.phone)
        });
        if taken {
            return Ok(CreateUserOutcome::Conflict);
        }

        inner.next_user_id += 1;
        let now = Utc::now();
        let record = User {
            id: inner.next_user_id,
            username: user.username,
            email: user.email,
            phone: user.phone,
            password_hash: user.password_hash,
            profile: user.profile,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(record.id, record.clone());
        Ok(CreateUserOutcome::Created(record))
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn list_users(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64)> {
        let inner = self.inner.read().await;
        let total = i64::try_from(inner.users.len())?;
        let items = inner
            .users
            .values()
            .skip(usize::try_from(offset.max(0))?)
            .take(usize::try_from(limit.max(0))?)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.users.remove(&id).is_some();
        if removed {
            inner.sessions.retain(|_, session| session.user_id != id);
        }
        Ok(removed)
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&id).is_some_and(|user| {
            user.password_hash = password_hash.to_string();
            user.updated_at = Utc::now();
            true
        }))
    }

    async fn update_profile(
        &self,
        id: i64,
        username: Option<&str>,
        profile: &Value,
    ) -> Result<Option<User>> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&id).map(|user| {
            if let Some(username) = username {
                user.username = Some(username.to_string());
            }
            user.profile = profile.clone();
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn insert_session(
        &self,
        user_id: i64,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .with_context(|| format!("session ttl out of range: {ttl_seconds}s"))?;

        let mut inner = self.inner.write().await;
        inner.sessions.retain(|_, session| session.expires_at > now);
        inner.sessions.insert(
            token_hash.to_vec(),
            SessionRecord {
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(token_hash)
            .filter(|session| session.expires_at > Utc::now())
            .cloned())
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        self.inner.write().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn delete_other_sessions(&self, user_id: i64, keep: &[u8]) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|hash, session| session.user_id != user_id || hash.as_slice() == keep);
        Ok(u64::try_from(before - inner.sessions.len())?)
    }

    async fn list_nav(&self) -> Result<Vec<NavItem>> {
        Ok(self.inner.read().await.nav.values().cloned().collect())
    }

    async fn find_nav(&self, id: i64) -> Result<Option<NavItem>> {
        Ok(self.inner.read().await.nav.get(&id).cloned())
    }

    async fn insert_nav(&self, input: NavInput) -> Result<NavItem> {
        let mut inner = self.inner.write().await;
        inner.next_nav_id += 1;
        let item = NavItem {
            id: inner.next_nav_id,
            name: input.name,
            description: input.description,
            parent_id: input.parent_id,
        };
        inner.nav.insert(item.id, item.clone());
        Ok(item)
    }

    async fn update_nav(&self, id: i64, input: NavInput) -> Result<Option<NavItem>> {
        let mut inner = self.inner.write().await;
        Ok(inner.nav.get_mut(&id).map(|item| {
            item.name = input.name;
            item.description = input.description;
            item.parent_id = input.parent_id;
            item.clone()
        }))
    }

    async fn delete_nav(&self, ids: &[i64]) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let removed = ids
            .iter()
            .filter(|id| inner.nav.remove(*id).is_some())
            .count();
        Ok(u64::try_from(removed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::json;

    fn new_user(email: Option<&str>, phone: Option<&str>) -> NewUser {
        NewUser {
            username: Some("IDecs_tester".to_string()),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            password_hash: "scrypt$00$00".to_string(),
            profile: json!({"username": "IDecs_tester"}),
        }
    }

    async fn create(storage: &MemoryStorage, user: NewUser) -> Result<User> {
        match storage.create_user(user).await? {
            CreateUserOutcome::Created(user) => Ok(user),
            CreateUserOutcome::Conflict => bail!("unexpected conflict"),
        }
    }

    #[tokio::test]
    async fn create_user_assigns_ids_and_detects_conflicts() -> Result<()> {
        let storage = MemoryStorage::new();
        let first = create(&storage, new_user(Some("a@example.com"), None)).await?;
        let second = create(&storage, new_user(None, Some("13800138000"))).await?;
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let dup_email = storage
            .create_user(new_user(Some("a@example.com"), None))
            .await?;
        assert!(matches!(dup_email, CreateUserOutcome::Conflict));
        let dup_phone = storage
            .create_user(new_user(None, Some("13800138000")))
            .await?;
        assert!(matches!(dup_phone, CreateUserOutcome::Conflict));

        let by_email = storage.find_user_by_email("a@example.com").await?;
        assert_eq!(by_email.map(|u| u.id), Some(1));
        let by_phone = storage.find_user_by_phone("13800138000").await?;
        assert_eq!(by_phone.map(|u| u.id), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn list_users_paginates_in_id_order() -> Result<()> {
        let storage = MemoryStorage::new();
        for i in 0..5 {
            create(&storage, new_user(Some(&format!("{i}@example.com")), None)).await?;
        }
        let (items, total) = storage.list_users(2, 2).await?;
        assert_eq!(total, 5);
        assert_eq!(items.iter().map(|u| u.id).collect::<Vec<_>>(), vec![3, 4]);
        let (items, _) = storage.list_users(10, 2).await?;
        assert!(items.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn sessions_expire_and_are_revoked() -> Result<()> {
        let storage = MemoryStorage::new();
        let user = create(&storage, new_user(Some("a@example.com"), None)).await?;

        storage.insert_session(user.id, b"live", 60).await?;
        storage.insert_session(user.id, b"other", 60).await?;
        storage.insert_session(user.id, b"expired", -1).await?;

        assert!(storage.lookup_session(b"live").await?.is_some());
        assert!(storage.lookup_session(b"expired").await?.is_none());

        let revoked = storage.delete_other_sessions(user.id, b"live").await?;
        assert_eq!(revoked, 2);
        assert!(storage.lookup_session(b"live").await?.is_some());
        assert!(storage.lookup_session(b"other").await?.is_none());

        storage.delete_session(b"live").await?;
        assert!(storage.lookup_session(b"live").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn insert_session_prunes_expired_rows() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.insert_session(1, b"stale", -1).await?;
        storage.insert_session(1, b"fresh", 60).await?;

        let inner = storage.inner.read().await;
        assert!(!inner.sessions.contains_key(b"stale".as_slice()));
        assert!(inner.sessions.contains_key(b"fresh".as_slice()));
        Ok(())
    }

    #[tokio::test]
    async fn insert_session_rejects_out_of_range_ttl() -> Result<()> {
        let storage = MemoryStorage::new();
        assert!(storage.insert_session(1, b"token", i64::MAX).await.is_err());
        assert!(storage.lookup_session(b"token").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn delete_user_drops_sessions() -> Result<()> {
        let storage = MemoryStorage::new();
        let user = create(&storage, new_user(Some("a@example.com"), None)).await?;
        storage.insert_session(user.id, b"token", 60).await?;

        assert!(storage.delete_user(user.id).await?);
        assert!(!storage.delete_user(user.id).await?);
        assert!(storage.lookup_session(b"token").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn update_profile_and_password() -> Result<()> {
        let storage = MemoryStorage::new();
        let user = create(&storage, new_user(Some("a@example.com"), None)).await?;

        let updated = storage
            .update_profile(user.id, Some("haha"), &json!({"test": "prefect"}))
            .await?
            .context("user missing")?;
        assert_eq!(updated.username.as_deref(), Some("haha"));
        assert_eq!(updated.profile, json!({"test": "prefect"}));

        assert!(storage.update_password(user.id, "scrypt$11$11").await?);
        assert!(!storage.update_password(99, "scrypt$11$11").await?);
        let reloaded = storage.find_user(user.id).await?.context("user missing")?;
        assert_eq!(reloaded.password_hash, "scrypt$11$11");
        Ok(())
    }

    #[tokio::test]
    async fn nav_crud() -> Result<()> {
        let storage = MemoryStorage::new();
        let root = storage
            .insert_nav(NavInput {
                name: "Home".to_string(),
                description: "root".to_string(),
                parent_id: 0,
            })
            .await?;
        let child = storage
            .insert_nav(NavInput {
                name: "Users".to_string(),
                description: String::new(),
                parent_id: root.id,
            })
            .await?;

        let renamed = storage
            .update_nav(
                child.id,
                NavInput {
                    name: "Accounts".to_string(),
                    description: String::new(),
                    parent_id: root.id,
                },
            )
            .await?
            .context("nav missing")?;
        assert_eq!(renamed.name, "Accounts");

        assert_eq!(storage.list_nav().await?.len(), 2);
        assert_eq!(storage.delete_nav(&[root.id, child.id, 42]).await?, 2);
        assert!(storage.find_nav(root.id).await?.is_none());
        Ok(())
    }
}
