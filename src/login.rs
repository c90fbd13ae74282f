//! The step-up login state machine.
//!
//! A login attempt starts Unauthenticated, passes through zero or more
//! Intermediary hops carried by a short-lived login token, and terminates
//! either Complete (a session plus its token pair) or Rejected (a typed
//! error). No token is ever minted for an unverified factor, and no state
//! is mutated on a rejection except the recovery-code consumption that
//! itself constitutes a successful verification.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;
use uuid::Uuid;

use crate::credentials::Credentials;
use crate::error::Error;
use crate::session::Sessions;
use crate::store::{RecordStore, Role, UserRecord};
use crate::token::TokenCodec;
use crate::totp::TotpEngine;
use crate::users::{normalize_email, normalize_username};
use crate::verification::{available_after, is_blocked, VerificationType};

/// A login attempt completes once this many factors have verified.
///
/// The protocol is effectively single-factor: clients only chain steps by
/// re-presenting a login token from an intermediary response, the server
/// never demands a second factor itself.
const REQUIRED_VERIFICATIONS: usize = 1;

/// The credential presented in one login step.
#[derive(Clone, Debug)]
pub enum LoginCredential {
    Password(String),
    Totp(String),
    BackupCode(String),
    EmailCode(String),
}

impl LoginCredential {
    #[must_use]
    pub fn verification_type(&self) -> VerificationType {
        match self {
            Self::Password(_) => VerificationType::Password,
            Self::Totp(_) => VerificationType::Totp,
            Self::BackupCode(_) => VerificationType::BackupCode,
            Self::EmailCode(_) => VerificationType::Email,
        }
    }
}

/// One step of a login attempt.
///
/// Exactly one way of naming the acting identity must be present: a
/// username or an email on the first hop, or the login token issued by a
/// previous hop.
#[derive(Clone, Debug, Default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
    pub credential: Option<LoginCredential>,
}

/// Outcome of one login step.
#[derive(Clone, Debug)]
pub enum LoginOutcome {
    /// More steps may follow; the token carries the factors used so far.
    Intermediary {
        previous: Vec<VerificationType>,
        next: Vec<VerificationType>,
        token: String,
    },
    /// The attempt is finished and a session exists.
    Complete {
        user: UserRecord,
        access_token: String,
        refresh_token: String,
    },
}

/// Drives login attempts against the credential store and session manager.
#[derive(Clone)]
pub struct LoginFlow {
    store: Arc<dyn RecordStore>,
    codec: TokenCodec,
    totp: TotpEngine,
    credentials: Credentials,
    sessions: Sessions,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        codec: TokenCodec,
        totp: TotpEngine,
        credentials: Credentials,
        sessions: Sessions,
    ) -> Self {
        Self {
            store,
            codec,
            totp,
            credentials,
            sessions,
        }
    }

    /// Run one step of the login protocol.
    ///
    /// # Errors
    ///
    /// Every rejection path is a typed condition: malformed identity
    /// selection (`InvalidRequest`), a bad login token (`InvalidToken`),
    /// unknown user (`NotFound`), deleted user (`Deleted`), the reserved
    /// system role (`Forbidden`), a factor blocked by a previous hop
    /// (`VerificationTypeBlocked`), and the per-factor mismatch conditions.
    pub async fn step(&self, request: LoginRequest) -> Result<LoginOutcome, Error> {
        if request.username.is_some() && request.email.is_some() {
            return Err(Error::InvalidRequest(
                "username and email cannot be used at the same time".to_string(),
            ));
        }
        let Some(credential) = request.credential else {
            return Err(Error::InvalidRequest(
                "a verification credential is required".to_string(),
            ));
        };

        // Resolve the acting identity and the factors already satisfied.
        let (user, previous) = if let Some(token) = request.token.as_deref() {
            let claims = self.codec.verify_login(token)?;
            let user = self.store.user_by_id(claims.user_id).await?;
            (user, claims.verification_types)
        } else if let Some(username) = request.username.as_deref() {
            // Lookups normalize the same way registration stored the value.
            (
                self.store
                    .user_by_username(normalize_username(username))
                    .await?,
                Vec::new(),
            )
        } else if let Some(email) = request.email.as_deref() {
            (
                self.store.user_by_email(&normalize_email(email)).await?,
                Vec::new(),
            )
        } else {
            return Err(Error::InvalidRequest(
                "username, email or login token is required".to_string(),
            ));
        };

        let Some(user) = user else {
            return Err(Error::NotFound("user"));
        };
        if user.is_deleted() {
            return Err(Error::Deleted);
        }
        if user.role == Role::System {
            return Err(Error::Forbidden("system user cannot log in"));
        }

        // A user without an account is a data-integrity violation, not a
        // user-facing condition.
        let account = self
            .store
            .account_by_user_id(user.id)
            .await?
            .ok_or_else(|| Error::Internal(anyhow!("user {} has no account", user.id)))?;

        let requested = credential.verification_type();
        if is_blocked(&previous, requested) {
            return Err(Error::VerificationTypeBlocked);
        }

        match &credential {
            LoginCredential::EmailCode(_) => {
                // Defined by the protocol but not implemented yet.
                return Err(Error::NotSupported);
            }
            LoginCredential::Password(password) => {
                if !self.credentials.verify_password(&account, password) {
                    return Err(Error::InvalidPassword);
                }
            }
            LoginCredential::Totp(code) => {
                let Some(secret) = account.otp_secret.as_deref() else {
                    return Err(Error::TotpNotEnabled);
                };
                let instance = self.totp.instance(secret)?;
                if !self.totp.verify(&instance, code) {
                    return Err(Error::InvalidTotp);
                }
            }
            LoginCredential::BackupCode(code) => {
                // Consumption happens exactly when this factor succeeds.
                if !self.credentials.use_recovery_code(&account, code, true).await? {
                    return Err(Error::InvalidBackupCode);
                }
            }
        }

        let mut used = previous;
        used.push(requested);

        if used.len() >= REQUIRED_VERIFICATIONS {
            let (_, tokens) = self.sessions.create(user.id).await?;
            info!(user_id = %user.id, factor = requested.as_str(), "login complete");
            Ok(LoginOutcome::Complete {
                user,
                access_token: tokens.access,
                refresh_token: tokens.refresh,
            })
        } else {
            let next = available_after(&used);
            let token = self.codec.sign_login(user.id, &used)?;
            Ok(LoginOutcome::Intermediary {
                previous: used,
                next,
                token,
            })
        }
    }

    /// Sign a login token directly; the entry point for callers that layer
    /// their own step policy on top of the protocol.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if signing fails.
    pub fn login_token(
        &self,
        user_id: Uuid,
        verification_types: &[VerificationType],
    ) -> Result<String, Error> {
        self.codec.sign_login(user_id, verification_types)
    }
}

#[cfg(test)]
mod tests {
    use super::{LoginCredential, LoginFlow, LoginOutcome, LoginRequest};
    use crate::config::{SessionLifetime, TokenSettings};
    use crate::credentials::Credentials;
    use crate::error::Error;
    use crate::password::{PasswordAlgorithm, PasswordHasher};
    use crate::session::Sessions;
    use crate::store::{MemoryStore, NewUser, RecordStore, Role};
    use crate::token::TokenCodec;
    use crate::totp::{TotpConfig, TotpEngine};
    use crate::verification::VerificationType;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        flow: LoginFlow,
        credentials: Credentials,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let codec = TokenCodec::new(&TokenSettings::from_secrets("a", "r", "l"));
        let totp = TotpEngine::new(TotpConfig::new());
        let credentials = Credentials::new(
            store.clone(),
            PasswordHasher::new(PasswordAlgorithm::Sha512),
            totp.clone(),
            Duration::from_secs(300),
        );
        let sessions = Sessions::new(
            store.clone(),
            codec.clone(),
            SessionLifetime::Days(1),
            64,
        );
        let flow = LoginFlow::new(
            store.clone(),
            codec,
            totp,
            credentials.clone(),
            sessions,
        );
        Fixture {
            store,
            flow,
            credentials,
        }
    }

    async fn register(fixture: &Fixture, username: &str, role: Role) -> Uuid {
        let user = fixture
            .store
            .create_user(NewUser {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                display_name: username.to_string(),
                role,
            })
            .await
            .unwrap();
        fixture
            .credentials
            .create_for_user(user.id, "longenough1")
            .await
            .unwrap();
        user.id
    }

    fn password_request(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: Some(username.to_string()),
            credential: Some(LoginCredential::Password(password.to_string())),
            ..LoginRequest::default()
        }
    }

    #[tokio::test]
    async fn password_login_completes_with_a_session() {
        let fixture = fixture();
        let user_id = register(&fixture, "alice", Role::Unverified).await;

        let outcome = fixture
            .flow
            .step(password_request("alice", "longenough1"))
            .await
            .unwrap();
        match outcome {
            LoginOutcome::Complete {
                user, access_token, ..
            } => {
                assert_eq!(user.id, user_id);
                assert!(!access_token.is_empty());
            }
            LoginOutcome::Intermediary { .. } => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn email_identity_works_too() {
        let fixture = fixture();
        register(&fixture, "alice", Role::Unverified).await;
        let outcome = fixture
            .flow
            .step(LoginRequest {
                email: Some("alice@example.com".to_string()),
                credential: Some(LoginCredential::Password("longenough1".to_string())),
                ..LoginRequest::default()
            })
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Complete { .. }));
    }

    #[tokio::test]
    async fn identity_selectors_normalize_like_registration() {
        let fixture = fixture();
        register(&fixture, "alice", Role::Unverified).await;

        // Stored lowercase; the selector tolerates case and spacing.
        let by_email = LoginRequest {
            email: Some(" Alice@Example.COM ".to_string()),
            credential: Some(LoginCredential::Password("longenough1".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(by_email).await,
            Ok(LoginOutcome::Complete { .. })
        ));

        let by_username = LoginRequest {
            username: Some(" alice ".to_string()),
            credential: Some(LoginCredential::Password("longenough1".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(by_username).await,
            Ok(LoginOutcome::Complete { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_identity_selection_is_rejected() {
        let fixture = fixture();
        register(&fixture, "alice", Role::Unverified).await;

        let both = LoginRequest {
            username: Some("alice".to_string()),
            email: Some("alice@example.com".to_string()),
            credential: Some(LoginCredential::Password("longenough1".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(both).await,
            Err(Error::InvalidRequest(_))
        ));

        let neither = LoginRequest {
            credential: Some(LoginCredential::Password("longenough1".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(neither).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_without_side_effects() {
        let fixture = fixture();
        let user_id = register(&fixture, "alice", Role::Unverified).await;
        assert!(matches!(
            fixture.flow.step(password_request("alice", "wrong")).await,
            Err(Error::InvalidPassword)
        ));
        // No session was created for the failed attempt.
        assert_eq!(
            fixture
                .store
                .delete_sessions_for_user(user_id)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn unknown_deleted_and_system_users_are_rejected() {
        let fixture = fixture();
        assert!(matches!(
            fixture.flow.step(password_request("ghost", "longenough1")).await,
            Err(Error::NotFound("user"))
        ));

        let deleted = register(&fixture, "gone", Role::Unverified).await;
        fixture.store.soft_delete_user(deleted).await.unwrap();
        let by_token = LoginRequest {
            token: Some(fixture.flow.login_token(deleted, &[]).unwrap()),
            credential: Some(LoginCredential::Password("longenough1".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(fixture.flow.step(by_token).await, Err(Error::Deleted)));

        register(&fixture, "daemon", Role::System).await;
        assert!(matches!(
            fixture.flow.step(password_request("daemon", "longenough1")).await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn bad_login_tokens_are_rejected() {
        let fixture = fixture();
        register(&fixture, "alice", Role::Unverified).await;
        let request = LoginRequest {
            token: Some("garbage".to_string()),
            credential: Some(LoginCredential::Password("longenough1".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(request).await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn blocking_rules_apply_across_hops() {
        let fixture = fixture();
        let user_id = register(&fixture, "alice", Role::Unverified).await;

        // A prior hop used totp; the totp family is blocked, password is not.
        let token = fixture
            .flow
            .login_token(user_id, &[VerificationType::Totp])
            .unwrap();

        let blocked = LoginRequest {
            token: Some(token.clone()),
            credential: Some(LoginCredential::BackupCode("whatever".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(blocked).await,
            Err(Error::VerificationTypeBlocked)
        ));

        let allowed = LoginRequest {
            token: Some(token),
            credential: Some(LoginCredential::Password("longenough1".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(allowed).await,
            Ok(LoginOutcome::Complete { .. })
        ));
    }

    #[tokio::test]
    async fn backup_code_is_consumed_exactly_once() {
        let fixture = fixture();
        let user_id = register(&fixture, "alice", Role::Unverified).await;
        let account = fixture
            .store
            .account_by_user_id(user_id)
            .await
            .unwrap()
            .unwrap();
        let code = account.recovery_codes[0].clone();
        let count = account.recovery_codes.len();

        let request = |code: &str| LoginRequest {
            username: Some("alice".to_string()),
            credential: Some(LoginCredential::BackupCode(code.to_string())),
            ..LoginRequest::default()
        };

        assert!(matches!(
            fixture.flow.step(request(&code)).await,
            Ok(LoginOutcome::Complete { .. })
        ));
        let account = fixture
            .store
            .account_by_user_id(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.recovery_codes.len(), count - 1);

        assert!(matches!(
            fixture.flow.step(request(&code)).await,
            Err(Error::InvalidBackupCode)
        ));
    }

    #[tokio::test]
    async fn totp_factor_requires_enrollment_and_a_valid_code() {
        let fixture = fixture();
        let user_id = register(&fixture, "alice", Role::Unverified).await;

        let request = |code: &str| LoginRequest {
            username: Some("alice".to_string()),
            credential: Some(LoginCredential::Totp(code.to_string())),
            ..LoginRequest::default()
        };

        assert!(matches!(
            fixture.flow.step(request("000000")).await,
            Err(Error::TotpNotEnabled)
        ));

        let enrollment = fixture
            .credentials
            .begin_totp_enrollment(user_id)
            .await
            .unwrap();
        let engine = TotpEngine::new(TotpConfig::new());
        let totp = engine.instance(&enrollment.secret).unwrap();
        let code = totp.generate_current().unwrap();
        fixture
            .credentials
            .confirm_totp_enrollment(user_id, &code, "longenough1")
            .await
            .unwrap();

        assert!(matches!(
            fixture.flow.step(request("000000")).await,
            Err(Error::InvalidTotp)
        ));
        let code = totp.generate_current().unwrap();
        assert!(matches!(
            fixture.flow.step(request(&code)).await,
            Ok(LoginOutcome::Complete { .. })
        ));
    }

    #[tokio::test]
    async fn email_factor_is_not_supported() {
        let fixture = fixture();
        register(&fixture, "alice", Role::Unverified).await;
        let request = LoginRequest {
            username: Some("alice".to_string()),
            credential: Some(LoginCredential::EmailCode("123456".to_string())),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(request).await,
            Err(Error::NotSupported)
        ));
    }

    #[tokio::test]
    async fn missing_credential_is_malformed() {
        let fixture = fixture();
        register(&fixture, "alice", Role::Unverified).await;
        let request = LoginRequest {
            username: Some("alice".to_string()),
            ..LoginRequest::default()
        };
        assert!(matches!(
            fixture.flow.step(request).await,
            Err(Error::InvalidRequest(_))
        ));
    }
}
