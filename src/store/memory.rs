//! In-memory record store for tests and single-process embedding.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountRecord, NewAccount, NewUser, RecordStore, Role, SessionRecord, UserRecord};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    accounts: HashMap<Uuid, AccountRecord>,
    sessions: HashMap<Uuid, SessionRecord>,
}

/// A mutex-guarded table set mirroring the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<UserRecord> {
        let mut tables = self.tables.lock().await;
        let taken = tables.users.values().any(|user| {
            user.username.as_deref() == Some(new.username.as_str())
                || user.email.as_deref() == Some(new.email.as_str())
        });
        if taken {
            bail!("username or email already in use");
        }
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: Some(new.username),
            email: Some(new.email),
            display_name: new.display_name,
            created_at: Utc::now(),
            deleted_at: None,
            banned_at: None,
            role: new.role,
            proof_of_work: None,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.username.as_deref() == Some(username))
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let tables = self.tables.lock().await;
        let mut users: Vec<UserRecord> = tables.users.values().cloned().collect();
        users.sort_by_key(|user| user.created_at);
        Ok(users)
    }

    async fn update_display_name(&self, id: Uuid, display_name: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.display_name = display_name.to_string();
                Ok(())
            }
            None => bail!("user {id} not found"),
        }
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.role = role;
                Ok(())
            }
            None => bail!("user {id} not found"),
        }
    }

    async fn update_proof_of_work(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.proof_of_work = token.map(str::to_string);
                Ok(())
            }
            None => bail!("user {id} not found"),
        }
    }

    async fn soft_delete_user(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.username = None;
                user.email = None;
                user.deleted_at = Some(Utc::now());
                Ok(())
            }
            None => bail!("user {id} not found"),
        }
    }

    async fn set_banned(&self, id: Uuid, banned: bool) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.banned_at = banned.then(Utc::now);
                Ok(())
            }
            None => bail!("user {id} not found"),
        }
    }

    async fn create_account(&self, new: NewAccount) -> Result<AccountRecord> {
        let mut tables = self.tables.lock().await;
        if tables
            .accounts
            .values()
            .any(|account| account.user_id == new.user_id)
        {
            bail!("user {} already has an account", new.user_id);
        }
        let account = AccountRecord {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            password_hash: new.password_hash,
            otp_secret: new.otp_secret,
            recovery_codes: new.recovery_codes,
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.accounts.get(&id).cloned())
    }

    async fn account_by_user_id(&self, user_id: Uuid) -> Result<Option<AccountRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.user_id == user_id)
            .cloned())
    }

    async fn update_password(&self, account_id: Uuid, password_hash: &[u8]) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.accounts.get_mut(&account_id) {
            Some(account) => {
                account.password_hash = password_hash.to_vec();
                Ok(())
            }
            None => bail!("account {account_id} not found"),
        }
    }

    async fn update_otp_secret(&self, account_id: Uuid, secret: Option<&str>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.accounts.get_mut(&account_id) {
            Some(account) => {
                account.otp_secret = secret.map(str::to_string);
                Ok(())
            }
            None => bail!("account {account_id} not found"),
        }
    }

    async fn update_recovery_codes(&self, account_id: Uuid, codes: &[String]) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.accounts.get_mut(&account_id) {
            Some(account) => {
                account.recovery_codes = codes.to_vec();
                Ok(())
            }
            None => bail!("account {account_id} not found"),
        }
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.remove(&account_id).is_none() {
            bail!("account {account_id} not found");
        }
        Ok(())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        secret_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables
            .sessions
            .values()
            .any(|session| session.user_id == user_id && session.secret_token == secret_token);
        if duplicate {
            bail!("session token already exists for user {user_id}");
        }
        let now = Utc::now();
        let session = SessionRecord {
            id: Uuid::new_v4(),
            user_id,
            secret_token: secret_token.to_string(),
            created_at: now,
            expires_at,
            last_used_at: now,
        };
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.sessions.get(&id).cloned())
    }

    async fn session_by_user_and_token(
        &self,
        user_id: Uuid,
        secret_token: &str,
    ) -> Result<Option<SessionRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .find(|session| session.user_id == user_id && session.secret_token == secret_token)
            .cloned())
    }

    async fn update_session_last_used(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(&id) {
            Some(session) => {
                session.last_used_at = Utc::now();
                Ok(())
            }
            None => bail!("session {id} not found"),
        }
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.sessions.remove(&id);
        Ok(())
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.user_id != user_id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn delete_expired_sessions(&self) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| !session.is_expired(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::{NewAccount, NewUser, RecordStore, Role};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            display_name: name.to_string(),
            role: Role::Unverified,
        }
    }

    #[tokio::test]
    async fn users_round_trip() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        assert_eq!(
            store.user_by_id(user.id).await.unwrap().unwrap().id,
            user.id
        );
        assert!(store
            .user_by_username("alice")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .user_by_email("alice@example.com")
            .await
            .unwrap()
            .is_some());
        assert!(store.user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let store = MemoryStore::new();
        store.create_user(new_user("alice")).await.unwrap();
        assert!(store.create_user(new_user("alice")).await.is_err());
    }

    #[tokio::test]
    async fn soft_delete_nulls_pii() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        store.soft_delete_user(user.id).await.unwrap();
        let deleted = store.user_by_id(user.id).await.unwrap().unwrap();
        assert!(deleted.username.is_none());
        assert!(deleted.email.is_none());
        assert!(deleted.is_deleted());
        assert!(store.user_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accounts_are_one_per_user() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        let new = |user_id| NewAccount {
            user_id,
            password_hash: vec![1, 2, 3],
            otp_secret: None,
            recovery_codes: vec!["code".to_string()],
        };
        store.create_account(new(user.id)).await.unwrap();
        assert!(store.create_account(new(user.id)).await.is_err());
        let account = store.account_by_user_id(user.id).await.unwrap().unwrap();
        assert_eq!(account.recovery_codes, vec!["code".to_string()]);
    }

    #[tokio::test]
    async fn mutations_on_absent_rows_fail() {
        let store = MemoryStore::new();
        assert!(store.update_password(Uuid::new_v4(), &[0]).await.is_err());
        assert!(store
            .update_display_name(Uuid::new_v4(), "ghost")
            .await
            .is_err());
        assert!(store
            .update_session_last_used(Uuid::new_v4())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn expired_sweep_only_removes_past_sessions() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        let now = Utc::now();
        store
            .create_session(user.id, "live", now + Duration::days(1))
            .await
            .unwrap();
        store
            .create_session(user.id, "stale", now - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(store.delete_expired_sessions().await.unwrap(), 1);
        assert!(store
            .session_by_user_and_token(user.id, "live")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .session_by_user_and_token(user.id, "stale")
            .await
            .unwrap()
            .is_none());
    }
}
