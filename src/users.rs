//! Registration, user lookups, administration and the proof-of-work gate.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use crate::credentials::{Credentials, MIN_PASSWORD_LENGTH};
use crate::error::Error;
use crate::pow;
use crate::session::Sessions;
use crate::store::{NewUser, RecordStore, Role, UserRecord};

const MIN_USERNAME_LENGTH: usize = 5;
const MAX_USERNAME_LENGTH: usize = 250;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles"));

/// A completed registration: the new user plus its first session's tokens.
#[derive(Clone, Debug)]
pub struct Registration {
    pub user: UserRecord,
    pub account_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

/// User directory and administrative operations.
#[derive(Clone)]
pub struct Users {
    store: Arc<dyn RecordStore>,
    credentials: Credentials,
    sessions: Sessions,
}

impl Users {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, credentials: Credentials, sessions: Sessions) -> Self {
        Self {
            store,
            credentials,
            sessions,
        }
    }

    /// Register a new user: unique username and email, a fresh credential
    /// set, and an initial session.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` for malformed inputs, `Error::AlreadyUsed`
    /// when the username or email is taken.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Registration, Error> {
        let username = normalize_username(username);
        if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&username.len()) {
            return Err(Error::InvalidRequest(format!(
                "username must be between {MIN_USERNAME_LENGTH} and {MAX_USERNAME_LENGTH} characters"
            )));
        }
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(Error::InvalidRequest("invalid email address".to_string()));
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::InvalidRequest(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        if self.store.user_by_username(username).await?.is_some() {
            return Err(Error::AlreadyUsed("username"));
        }
        if self.store.user_by_email(&email).await?.is_some() {
            return Err(Error::AlreadyUsed("email"));
        }

        let user = self
            .store
            .create_user(NewUser {
                username: username.to_string(),
                email,
                display_name: username.to_string(),
                role: Role::Unverified,
            })
            .await?;
        let account = self.credentials.create_for_user(user.id, password).await?;
        let (_, tokens) = self.sessions.create(user.id).await?;
        info!(user_id = %user.id, "registered user");

        Ok(Registration {
            user,
            account_id: account.id,
            access_token: tokens.access,
            refresh_token: tokens.refresh,
        })
    }

    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn by_id(&self, id: Uuid) -> Result<Option<UserRecord>, Error> {
        Ok(self.store.user_by_id(id).await?)
    }

    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn by_username(&self, username: &str) -> Result<Option<UserRecord>, Error> {
        Ok(self
            .store
            .user_by_username(normalize_username(username))
            .await?)
    }

    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn by_email(&self, email: &str) -> Result<Option<UserRecord>, Error> {
        Ok(self.store.user_by_email(&normalize_email(email)).await?)
    }

    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn list(&self) -> Result<Vec<UserRecord>, Error> {
        Ok(self.store.list_users().await?)
    }

    /// # Errors
    ///
    /// `Error::NotFound` when the user does not exist.
    pub async fn set_display_name(
        &self,
        user_id: Uuid,
        display_name: &str,
    ) -> Result<UserRecord, Error> {
        self.require(user_id).await?;
        self.store.update_display_name(user_id, display_name).await?;
        self.require(user_id).await
    }

    /// # Errors
    ///
    /// `Error::NotFound` when the user does not exist.
    pub async fn set_role(&self, user_id: Uuid, role: Role) -> Result<UserRecord, Error> {
        self.require(user_id).await?;
        self.store.update_role(user_id, role).await?;
        self.require(user_id).await
    }

    /// # Errors
    ///
    /// `Error::NotFound` when the user does not exist.
    pub async fn ban(&self, user_id: Uuid) -> Result<UserRecord, Error> {
        self.require(user_id).await?;
        self.store.set_banned(user_id, true).await?;
        self.require(user_id).await
    }

    /// # Errors
    ///
    /// `Error::NotFound` when the user does not exist.
    pub async fn unban(&self, user_id: Uuid) -> Result<UserRecord, Error> {
        self.require(user_id).await?;
        self.store.set_banned(user_id, false).await?;
        self.require(user_id).await
    }

    /// Soft-delete a user: null the PII columns and stamp the deletion,
    /// destroy the credential set, revoke every session. The user row
    /// itself is kept.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user does not exist.
    pub async fn soft_delete(&self, user_id: Uuid) -> Result<(), Error> {
        let user = self.require(user_id).await?;
        if let Some(account) = self.store.account_by_user_id(user.id).await? {
            self.store.delete_account(account.id).await?;
        }
        self.store.soft_delete_user(user.id).await?;
        let revoked = self.sessions.delete_all_for_user(user.id).await?;
        info!(user_id = %user.id, revoked, "soft deleted user");
        Ok(())
    }

    /// The stored proof-of-work token, if any.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user does not exist.
    pub async fn proof_of_work(&self, user_id: Uuid) -> Result<Option<String>, Error> {
        Ok(self.require(user_id).await?.proof_of_work)
    }

    /// Difficulty of a user's stored proof; an absent token counts as zero.
    /// Recomputed on demand, never persisted.
    #[must_use]
    pub fn proof_of_work_difficulty(user: &UserRecord) -> u32 {
        user.proof_of_work
            .as_deref()
            .map(pow::difficulty)
            .unwrap_or(0)
    }

    /// Store a new proof-of-work token for the user.
    ///
    /// A replacement is only accepted when its difficulty is not lower than
    /// the stored one's, unless `ignore_previous` bypasses the floor.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user does not exist,
    /// `Error::InvalidRequest` when the new proof is weaker than the stored
    /// one.
    pub async fn submit_proof_of_work(
        &self,
        user_id: Uuid,
        token: Option<&str>,
        ignore_previous: bool,
    ) -> Result<UserRecord, Error> {
        let user = self.require(user_id).await?;
        if !ignore_previous {
            let previous = Self::proof_of_work_difficulty(&user);
            let submitted = token.map(pow::difficulty).unwrap_or(0);
            if submitted < previous {
                return Err(Error::InvalidRequest(
                    "new proof of work has lower difficulty than the previous one".to_string(),
                ));
            }
        }
        self.store.update_proof_of_work(user_id, token).await?;
        self.require(user_id).await
    }

    async fn require(&self, user_id: Uuid) -> Result<UserRecord, Error> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound("user"))
    }
}

/// Normalize an email for lookup/uniqueness checks.
///
/// Every path that touches the email column (registration, lookups, the
/// login identity selector) must go through this so stored and queried
/// forms agree.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize a username the same way registration stores it.
pub(crate) fn normalize_username(username: &str) -> &str {
    username.trim()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL_REGEX.is_match(email_normalized)
}
