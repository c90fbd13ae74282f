//! Session lifecycle and bearer-token resolution.
//!
//! A session row owns an opaque random secret token. Access and refresh
//! tokens derived from one session embed that same secret, so either kind
//! resolves to the identical row, and deleting the row invalidates both at
//! once even while the tokens remain cryptographically valid. A session
//! past its expiry never resolves, whether or not the sweep has removed it.

use std::sync::Arc;

use chrono::Utc;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SessionLifetime;
use crate::error::Error;
use crate::store::{RecordStore, SessionRecord};
use crate::token::{SessionClaims, TokenCodec};

/// The access/refresh pair derived from one session.
#[derive(Clone, Debug)]
pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
}

/// A freshly signed access token for an existing session.
#[derive(Clone, Debug)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub user_id: Uuid,
}

/// Creates, resolves and revokes sessions.
#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn RecordStore>,
    codec: TokenCodec,
    lifetime: SessionLifetime,
    token_length: usize,
}

impl Sessions {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        codec: TokenCodec,
        lifetime: SessionLifetime,
        token_length: usize,
    ) -> Self {
        Self {
            store,
            codec,
            lifetime,
            token_length,
        }
    }

    /// Create a session for the user and derive its token pair.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store insert or token signing fails.
    pub async fn create(&self, user_id: Uuid) -> Result<(SessionRecord, SessionTokens), Error> {
        let secret_token = generate_secret_token(self.token_length);
        let expires_at = self.lifetime.expires_from(Utc::now());
        let session = self
            .store
            .create_session(user_id, &secret_token, expires_at)
            .await?;
        let tokens = self.tokens_for(&session)?;
        Ok((session, tokens))
    }

    /// Sign the access/refresh pair for an existing session.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if signing fails.
    pub fn tokens_for(&self, session: &SessionRecord) -> Result<SessionTokens, Error> {
        Ok(SessionTokens {
            access: self.access_token_for(session)?,
            refresh: self
                .codec
                .sign_refresh(session.user_id, &session.secret_token)?,
        })
    }

    /// Sign a fresh access token for an existing session.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if signing fails.
    pub fn access_token_for(&self, session: &SessionRecord) -> Result<String, Error> {
        self.codec
            .sign_access(session.user_id, &session.secret_token)
    }

    /// Point lookup by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn by_id(&self, id: Uuid) -> Result<Option<SessionRecord>, Error> {
        Ok(self.store.session_by_id(id).await?)
    }

    /// Point lookup by the `(user_id, secret_token)` pair.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn by_user_and_token(
        &self,
        user_id: Uuid,
        secret_token: &str,
    ) -> Result<Option<SessionRecord>, Error> {
        Ok(self
            .store
            .session_by_user_and_token(user_id, secret_token)
            .await?)
    }

    /// Resolve an access token to its live session.
    ///
    /// Any verification failure, lookup miss or expired session yields
    /// `None`, so callers translate every miss into the same
    /// authentication failure.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn by_access_token(&self, token: &str) -> Result<Option<SessionRecord>, Error> {
        match self.codec.verify_access(token) {
            Ok(claims) => self.resolve_live(&claims).await,
            Err(_) => Ok(None),
        }
    }

    /// Resolve a refresh token to its live session.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn by_refresh_token(&self, token: &str) -> Result<Option<SessionRecord>, Error> {
        match self.codec.verify_refresh(token) {
            Ok(claims) => self.resolve_live(&claims).await,
            Err(_) => Ok(None),
        }
    }

    async fn resolve_live(&self, claims: &SessionClaims) -> Result<Option<SessionRecord>, Error> {
        let session = self
            .store
            .session_by_user_and_token(claims.user_id, &claims.session_token)
            .await?;
        let Some(session) = session else {
            return Ok(None);
        };
        if session.is_expired(Utc::now()) {
            return Ok(None);
        }
        // Bookkeeping only; a failed bump never fails the resolution.
        if let Err(err) = self.store.update_session_last_used(session.id).await {
            warn!(session_id = %session.id, "failed to update session last used: {err}");
        }
        Ok(Some(session))
    }

    /// Exchange a refresh token for a freshly signed access token.
    ///
    /// # Errors
    ///
    /// `Error::InvalidToken` when the token does not resolve to a live
    /// session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedAccess, Error> {
        let Some(session) = self.by_refresh_token(refresh_token).await? else {
            return Err(Error::InvalidToken);
        };
        Ok(RefreshedAccess {
            access_token: self.access_token_for(&session)?,
            user_id: session.user_id,
        })
    }

    /// Delete the session an access token resolves to.
    ///
    /// # Errors
    ///
    /// `Error::InvalidToken` when the token itself does not verify,
    /// `Error::NotFound` when its session no longer exists.
    pub async fn logout(&self, access_token: &str) -> Result<(), Error> {
        let claims = self.codec.verify_access(access_token)?;
        let session = self
            .store
            .session_by_user_and_token(claims.user_id, &claims.session_token)
            .await?
            .ok_or(Error::NotFound("session"))?;
        self.delete(&session).await
    }

    /// Delete one session.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn delete(&self, session: &SessionRecord) -> Result<(), Error> {
        self.store.delete_session(session.id).await?;
        Ok(())
    }

    /// Revoke every session of a user.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, Error> {
        Ok(self.store.delete_sessions_for_user(user_id).await?)
    }

    /// Maintenance sweep removing every session past its expiry.
    ///
    /// Intended to run periodically; resolution never depends on it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn delete_expired(&self) -> Result<u64, Error> {
        let deleted = self.store.delete_expired_sessions().await?;
        if deleted > 0 {
            info!(deleted, "removed expired sessions");
        }
        Ok(deleted)
    }

    /// Bump a session's last-used timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store fails.
    pub async fn update_last_used(&self, session: &SessionRecord) -> Result<(), Error> {
        self.store.update_session_last_used(session.id).await?;
        Ok(())
    }
}

fn generate_secret_token(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{generate_secret_token, Sessions};
    use crate::config::{SessionLifetime, TokenSettings};
    use crate::error::Error;
    use crate::store::{MemoryStore, NewUser, RecordStore, Role};
    use crate::token::TokenCodec;
    use std::sync::Arc;
    use uuid::Uuid;

    fn codec() -> TokenCodec {
        TokenCodec::new(&TokenSettings::from_secrets("a", "r", "l"))
    }

    fn sessions(store: Arc<MemoryStore>, lifetime: SessionLifetime) -> Sessions {
        Sessions::new(store, codec(), lifetime, 64)
    }

    async fn some_user(store: &Arc<MemoryStore>) -> Uuid {
        store
            .create_user(NewUser {
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                display_name: "bob".to_string(),
                role: Role::Unverified,
            })
            .await
            .unwrap()
            .id
    }

    #[test]
    fn secret_tokens_are_alphanumeric_at_length() {
        let token = generate_secret_token(64);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_secret_token(64));
    }

    #[tokio::test]
    async fn both_token_kinds_resolve_the_same_session() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(1));
        let user_id = some_user(&store).await;

        let (session, tokens) = sessions.create(user_id).await.unwrap();
        let by_access = sessions.by_access_token(&tokens.access).await.unwrap().unwrap();
        let by_refresh = sessions
            .by_refresh_token(&tokens.refresh)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_access.id, session.id);
        assert_eq!(by_refresh.id, session.id);
    }

    #[tokio::test]
    async fn deleting_the_session_invalidates_both_kinds() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(1));
        let user_id = some_user(&store).await;

        let (session, tokens) = sessions.create(user_id).await.unwrap();
        sessions.delete(&session).await.unwrap();

        // The raw tokens still verify; only the session lookup gates access.
        assert!(codec().verify_access(&tokens.access).is_ok());
        assert!(sessions.by_access_token(&tokens.access).await.unwrap().is_none());
        assert!(sessions
            .by_refresh_token(&tokens.refresh)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_sessions_never_resolve() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(0));
        let user_id = some_user(&store).await;

        let (session, tokens) = sessions.create(user_id).await.unwrap();
        // The row still exists, but resolution refuses it.
        assert!(sessions.by_id(session.id).await.unwrap().is_some());
        assert!(sessions.by_access_token(&tokens.access).await.unwrap().is_none());
        assert!(matches!(
            sessions.refresh(&tokens.refresh).await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn wrong_kind_does_not_resolve() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(1));
        let user_id = some_user(&store).await;

        let (_, tokens) = sessions.create(user_id).await.unwrap();
        assert!(sessions.by_access_token(&tokens.refresh).await.unwrap().is_none());
        assert!(sessions.by_refresh_token(&tokens.access).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_mints_a_usable_access_token() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(1));
        let user_id = some_user(&store).await;

        let (session, tokens) = sessions.create(user_id).await.unwrap();
        let refreshed = sessions.refresh(&tokens.refresh).await.unwrap();
        assert_eq!(refreshed.user_id, user_id);
        let resolved = sessions
            .by_access_token(&refreshed.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, session.id);
    }

    #[tokio::test]
    async fn logout_deletes_and_is_not_repeatable() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(1));
        let user_id = some_user(&store).await;

        let (_, tokens) = sessions.create(user_id).await.unwrap();
        sessions.logout(&tokens.access).await.unwrap();
        assert!(matches!(
            sessions.logout(&tokens.access).await,
            Err(Error::NotFound("session"))
        ));
        assert!(matches!(
            sessions.logout("garbage").await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn resolution_bumps_last_used() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(1));
        let user_id = some_user(&store).await;

        let (session, tokens) = sessions.create(user_id).await.unwrap();
        let resolved = sessions.by_access_token(&tokens.access).await.unwrap().unwrap();
        assert!(resolved.last_used_at >= session.last_used_at);

        let stored = store.session_by_id(session.id).await.unwrap().unwrap();
        assert!(stored.last_used_at >= session.last_used_at);
    }

    #[tokio::test]
    async fn revoking_all_counts_the_rows() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(store.clone(), SessionLifetime::Days(1));
        let user_id = some_user(&store).await;

        sessions.create(user_id).await.unwrap();
        sessions.create(user_id).await.unwrap();
        assert_eq!(sessions.delete_all_for_user(user_id).await.unwrap(), 2);
        assert_eq!(sessions.delete_all_for_user(user_id).await.unwrap(), 0);
    }
}
