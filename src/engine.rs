//! Wiring of the engine services around one configuration and one store.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::credentials::Credentials;
use crate::error::Error;
use crate::login::LoginFlow;
use crate::password::PasswordHasher;
use crate::pow;
use crate::session::Sessions;
use crate::store::RecordStore;
use crate::token::TokenCodec;
use crate::totp::TotpEngine;
use crate::users::Users;

/// The assembled engine.
///
/// Construction validates the configuration once; afterwards every service
/// shares the same codec, TOTP parameters and record store.
pub struct Engine {
    config: EngineConfig,
    codec: TokenCodec,
    totp: TotpEngine,
    credentials: Credentials,
    sessions: Sessions,
    login: LoginFlow,
    users: Users,
}

impl Engine {
    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a malformed session lifetime expression
    /// or unsupported TOTP parameters; nothing is validated lazily later.
    pub fn new(config: EngineConfig, store: Arc<dyn RecordStore>) -> Result<Self, Error> {
        let lifetime = config.session().lifetime()?;
        config.totp().validate()?;

        let codec = TokenCodec::new(config.tokens());
        let totp = TotpEngine::new(config.totp().clone());
        let hasher = PasswordHasher::new(config.password_algorithm());
        let credentials = Credentials::new(
            store.clone(),
            hasher,
            totp.clone(),
            Duration::from_secs(config.totp().pending_ttl_seconds()),
        );
        let sessions = Sessions::new(
            store.clone(),
            codec.clone(),
            lifetime,
            config.session().token_length(),
        );
        let login = LoginFlow::new(
            store.clone(),
            codec.clone(),
            totp.clone(),
            credentials.clone(),
            sessions.clone(),
        );
        let users = Users::new(store, credentials.clone(), sessions.clone());

        Ok(Self {
            config,
            codec,
            totp,
            credentials,
            sessions,
            login,
            users,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn totp(&self) -> &TotpEngine {
        &self.totp
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    #[must_use]
    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    #[must_use]
    pub fn login(&self) -> &LoginFlow {
        &self.login
    }

    #[must_use]
    pub fn users(&self) -> &Users {
        &self.users
    }

    /// Expected seconds for a client to find a proof of `difficulty` at the
    /// configured hashing speed. Reporting only.
    #[must_use]
    pub fn estimate_proof_seconds(&self, difficulty: u32) -> f64 {
        pow::estimate_seconds(difficulty, self.config.hashing_speed())
    }
}
