//! Authentication and session lifecycle engine.
//!
//! The engine drives a step-up login protocol over four factor categories
//! (password, email, TOTP, single-use recovery codes), manages the
//! dual-token session model (short-lived access tokens and long-lived
//! refresh tokens bound to a persisted session), and exposes a
//! proof-of-work difficulty gate usable as an anti-automation check.
//!
//! Persistence is a collaborator behind [`store::RecordStore`]; the crate
//! ships a Postgres implementation and an in-memory one. Everything else
//! (token signing, TOTP validation, proof-of-work) is a pure function of
//! its inputs plus the process-wide [`config::EngineConfig`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use ensaluti::{Engine, EngineConfig, TokenSettings};
//! use ensaluti::store::MemoryStore;
//!
//! # fn main() -> Result<(), ensaluti::Error> {
//! let config = EngineConfig::new(TokenSettings::from_secrets(
//!     "access-secret",
//!     "refresh-secret",
//!     "login-secret",
//! ));
//! let engine = Engine::new(config, Arc::new(MemoryStore::new()))?;
//! # let _ = engine;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod login;
pub mod password;
pub mod pow;
pub mod session;
pub mod store;
pub mod token;
pub mod totp;
pub mod users;
pub mod verification;

pub use config::{EngineConfig, SessionConfig, SessionLifetime, TokenKindConfig, TokenSettings};
pub use engine::Engine;
pub use error::Error;
pub use login::{LoginCredential, LoginFlow, LoginOutcome, LoginRequest};
pub use session::{RefreshedAccess, SessionTokens, Sessions};
pub use store::{AccountRecord, RecordStore, Role, SessionRecord, UserRecord};
pub use token::{LoginClaims, SessionClaims, TokenCodec, TokenKind};
pub use verification::VerificationType;
