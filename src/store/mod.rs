//! The record store consumed by the engine.
//!
//! The engine treats persistence as an external collaborator: everything it
//! needs is the operation set on [`RecordStore`], held behind
//! `Arc<dyn RecordStore>`. Two implementations ship with the crate: a
//! Postgres store and an in-memory store for tests and single-process
//! embedding.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Privilege level of a user.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Reserved internal role; never allowed to log in.
    System,
    Admin,
    User,
    /// Default role at registration.
    Unverified,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Admin => "admin",
            Self::User => "user",
            Self::Unverified => "unverified",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "system" => Some(Self::System),
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            "unverified" => Some(Self::Unverified),
            _ => None,
        }
    }
}

/// Public identity record.
///
/// Soft deletion nulls `username` and `email` and stamps `deleted_at`; the
/// row itself is never removed in normal operation.
#[derive(Clone, Debug, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
    pub role: Role,
    pub proof_of_work: Option<String>,
}

impl UserRecord {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }
}

/// Credential set, one-to-one with a user.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub password_hash: Vec<u8>,
    pub otp_secret: Option<String>,
    pub recovery_codes: Vec<String>,
}

/// One authenticated device or browser instance.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Opaque random token binding bearer tokens to this row; never sent to
    /// the client on its own.
    pub secret_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Expired means past `expires_at`, whether or not the row still exists.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Fields for a new user row; id and timestamps are store-assigned.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

/// Fields for a new account row.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub user_id: Uuid,
    pub password_hash: Vec<u8>,
    pub otp_secret: Option<String>,
    pub recovery_codes: Vec<String>,
}

/// The persistence operations the engine depends on.
///
/// Lookups return `Ok(None)` for absent rows; mutations on absent rows are
/// errors. All failures are opaque `anyhow` errors that the services surface
/// as internal conditions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_user(&self, new: NewUser) -> Result<UserRecord>;
    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>>;
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;
    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;
    async fn list_users(&self) -> Result<Vec<UserRecord>>;
    async fn update_display_name(&self, id: Uuid, display_name: &str) -> Result<()>;
    async fn update_role(&self, id: Uuid, role: Role) -> Result<()>;
    async fn update_proof_of_work(&self, id: Uuid, token: Option<&str>) -> Result<()>;
    /// Null the PII columns and stamp `deleted_at`.
    async fn soft_delete_user(&self, id: Uuid) -> Result<()>;
    async fn set_banned(&self, id: Uuid, banned: bool) -> Result<()>;

    async fn create_account(&self, new: NewAccount) -> Result<AccountRecord>;
    async fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>>;
    async fn account_by_user_id(&self, user_id: Uuid) -> Result<Option<AccountRecord>>;
    async fn update_password(&self, account_id: Uuid, password_hash: &[u8]) -> Result<()>;
    async fn update_otp_secret(&self, account_id: Uuid, secret: Option<&str>) -> Result<()>;
    async fn update_recovery_codes(&self, account_id: Uuid, codes: &[String]) -> Result<()>;
    async fn delete_account(&self, account_id: Uuid) -> Result<()>;

    async fn create_session(
        &self,
        user_id: Uuid,
        secret_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord>;
    async fn session_by_id(&self, id: Uuid) -> Result<Option<SessionRecord>>;
    async fn session_by_user_and_token(
        &self,
        user_id: Uuid,
        secret_token: &str,
    ) -> Result<Option<SessionRecord>>;
    async fn update_session_last_used(&self, id: Uuid) -> Result<()>;
    async fn delete_session(&self, id: Uuid) -> Result<()>;
    /// Delete every session for a user; returns the number removed.
    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64>;
    /// Delete every session past its expiry; returns the number removed.
    async fn delete_expired_sessions(&self) -> Result<u64>;
}
