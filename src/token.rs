//! Signing and verification of the three bearer-token kinds.
//!
//! Access and refresh tokens carry a user id and the opaque secret token of
//! the session they are bound to; login tokens carry the verification types
//! already satisfied mid-protocol. Each kind is signed under its own secret
//! and issuer, and a token of one kind never verifies as another: the kind
//! tag is embedded in the claims and checked alongside signature, issuer and
//! expiry.

use anyhow::anyhow;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{TokenKindConfig, TokenSettings};
use crate::error::Error;
use crate::verification::VerificationType;

/// The three bearer-token classes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    Login,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Login => "login",
        }
    }
}

/// Claims carried by access and refresh tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub session_token: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by mid-protocol login tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginClaims {
    pub user_id: Uuid,
    pub verification_types: Vec<VerificationType>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
struct KindKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl_seconds: i64,
}

impl KindKeys {
    fn new(config: &TokenKindConfig) -> Self {
        let secret = config.secret().expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer()]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer().to_string(),
            ttl_seconds: config.ttl_seconds(),
        }
    }
}

/// Signs and verifies bearer tokens against per-kind settings.
#[derive(Clone)]
pub struct TokenCodec {
    access: KindKeys,
    refresh: KindKeys,
    login: KindKeys,
}

impl TokenCodec {
    #[must_use]
    pub fn new(settings: &TokenSettings) -> Self {
        Self {
            access: KindKeys::new(settings.access()),
            refresh: KindKeys::new(settings.refresh()),
            login: KindKeys::new(settings.login()),
        }
    }

    fn keys(&self, kind: TokenKind) -> &KindKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
            TokenKind::Login => &self.login,
        }
    }

    fn sign_session(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        session_token: &str,
    ) -> Result<String, Error> {
        let keys = self.keys(kind);
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            user_id,
            session_token: session_token.to_string(),
            kind,
            iss: keys.issuer.clone(),
            iat: now,
            exp: now + keys.ttl_seconds,
        };
        encode(&Header::default(), &claims, &keys.encoding)
            .map_err(|err| Error::Internal(anyhow!("failed to sign {} token: {err}", kind.as_str())))
    }

    fn verify_session(&self, kind: TokenKind, token: &str) -> Result<SessionClaims, Error> {
        let keys = self.keys(kind);
        let data = decode::<SessionClaims>(token, &keys.decoding, &keys.validation)
            .map_err(|_| Error::InvalidToken)?;
        if data.claims.kind != kind {
            return Err(Error::InvalidToken);
        }
        Ok(data.claims)
    }

    /// Sign an access token bound to a session's secret token.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if encoding fails.
    pub fn sign_access(&self, user_id: Uuid, session_token: &str) -> Result<String, Error> {
        self.sign_session(TokenKind::Access, user_id, session_token)
    }

    /// Sign a refresh token bound to a session's secret token.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if encoding fails.
    pub fn sign_refresh(&self, user_id: Uuid, session_token: &str) -> Result<String, Error> {
        self.sign_session(TokenKind::Refresh, user_id, session_token)
    }

    /// Sign a mid-protocol login token carrying the used verification types.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if encoding fails.
    pub fn sign_login(
        &self,
        user_id: Uuid,
        verification_types: &[VerificationType],
    ) -> Result<String, Error> {
        let keys = self.keys(TokenKind::Login);
        let now = Utc::now().timestamp();
        let claims = LoginClaims {
            user_id,
            verification_types: verification_types.to_vec(),
            kind: TokenKind::Login,
            iss: keys.issuer.clone(),
            iat: now,
            exp: now + keys.ttl_seconds,
        };
        encode(&Header::default(), &claims, &keys.encoding)
            .map_err(|err| Error::Internal(anyhow!("failed to sign login token: {err}")))
    }

    /// Verify an access token.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidToken` on any signature, issuer, expiry or
    /// kind mismatch; the unverified payload is never exposed.
    pub fn verify_access(&self, token: &str) -> Result<SessionClaims, Error> {
        self.verify_session(TokenKind::Access, token)
    }

    /// Verify a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidToken` on any signature, issuer, expiry or
    /// kind mismatch.
    pub fn verify_refresh(&self, token: &str) -> Result<SessionClaims, Error> {
        self.verify_session(TokenKind::Refresh, token)
    }

    /// Verify a login token.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidToken` on any signature, issuer, expiry or
    /// kind mismatch.
    pub fn verify_login(&self, token: &str) -> Result<LoginClaims, Error> {
        let keys = self.keys(TokenKind::Login);
        let data = decode::<LoginClaims>(token, &keys.decoding, &keys.validation)
            .map_err(|_| Error::InvalidToken)?;
        if data.claims.kind != TokenKind::Login {
            return Err(Error::InvalidToken);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::TokenCodec;
    use crate::config::{TokenKindConfig, TokenSettings};
    use crate::error::Error;
    use crate::verification::VerificationType;
    use uuid::Uuid;

    fn codec() -> TokenCodec {
        TokenCodec::new(&TokenSettings::from_secrets(
            "access-secret",
            "refresh-secret",
            "login-secret",
        ))
    }

    #[test]
    fn session_tokens_round_trip() {
        let codec = codec();
        let user_id = Uuid::new_v4();

        let access = codec.sign_access(user_id, "opaque").unwrap();
        let claims = codec.verify_access(&access).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.session_token, "opaque");

        let refresh = codec.sign_refresh(user_id, "opaque").unwrap();
        let claims = codec.verify_refresh(&refresh).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.session_token, "opaque");
    }

    #[test]
    fn login_tokens_preserve_verification_order() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let used = [VerificationType::Password, VerificationType::Totp];
        let token = codec.sign_login(user_id, &used).unwrap();
        let claims = codec.verify_login(&token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.verification_types, used.to_vec());
    }

    #[test]
    fn kinds_never_verify_as_one_another() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let access = codec.sign_access(user_id, "opaque").unwrap();
        let refresh = codec.sign_refresh(user_id, "opaque").unwrap();
        let login = codec.sign_login(user_id, &[VerificationType::Password]).unwrap();

        assert!(matches!(codec.verify_refresh(&access), Err(Error::InvalidToken)));
        assert!(matches!(codec.verify_access(&refresh), Err(Error::InvalidToken)));
        assert!(matches!(codec.verify_access(&login), Err(Error::InvalidToken)));
        assert!(matches!(codec.verify_login(&access), Err(Error::InvalidToken)));
    }

    #[test]
    fn kind_tag_is_checked_even_under_shared_settings() {
        // Same secret and issuer for every kind: the embedded tag must still
        // keep the kinds apart.
        let shared = TokenSettings::new(
            TokenKindConfig::new("shared", "shared-issuer", 600),
            TokenKindConfig::new("shared", "shared-issuer", 600),
            TokenKindConfig::new("shared", "shared-issuer", 600),
        );
        let codec = TokenCodec::new(&shared);
        let access = codec.sign_access(Uuid::new_v4(), "opaque").unwrap();
        assert!(matches!(codec.verify_refresh(&access), Err(Error::InvalidToken)));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let settings = TokenSettings::new(
            TokenKindConfig::new("access-secret", "ensaluti/access", -3600),
            TokenKindConfig::new("refresh-secret", "ensaluti/refresh", 600),
            TokenKindConfig::new("login-secret", "ensaluti/login", 600),
        );
        let codec = TokenCodec::new(&settings);
        let expired = codec.sign_access(Uuid::new_v4(), "opaque").unwrap();
        assert!(matches!(codec.verify_access(&expired), Err(Error::InvalidToken)));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let codec = codec();
        let other = TokenCodec::new(&TokenSettings::new(
            TokenKindConfig::new("access-secret", "someone-else", 600),
            TokenKindConfig::new("refresh-secret", "ensaluti/refresh", 600),
            TokenKindConfig::new("login-secret", "ensaluti/login", 600),
        ));
        let token = other.sign_access(Uuid::new_v4(), "opaque").unwrap();
        assert!(matches!(codec.verify_access(&token), Err(Error::InvalidToken)));
    }

    #[test]
    fn garbage_is_rejected() {
        let codec = codec();
        assert!(matches!(codec.verify_access(""), Err(Error::InvalidToken)));
        assert!(matches!(
            codec.verify_access("not.a.token"),
            Err(Error::InvalidToken)
        ));
    }
}
