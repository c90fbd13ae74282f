//! Typed error conditions surfaced by the engine.

use thiserror::Error;

/// Every rejection the engine can produce.
///
/// Variants map one-to-one onto the machine-readable tags returned by
/// [`Error::kind`]; the `Display` impl carries the short human message. The
/// `Internal` variant wraps lower-level failures (store, codec, integrity
/// violations) and deliberately does not expose its cause through `Display`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("user is deleted")]
    Deleted,

    #[error("{0} is already in use")]
    AlreadyUsed(&'static str),

    #[error("invalid password")]
    InvalidPassword,

    #[error("invalid totp code")]
    InvalidTotp,

    #[error("invalid backup code")]
    InvalidBackupCode,

    #[error("totp is not enabled")]
    TotpNotEnabled,

    #[error("totp is already enabled")]
    TotpAlreadyEnabled,

    #[error("totp secret not generated or expired")]
    TotpNotPending,

    #[error("verification type is blocked by a previous verification type")]
    VerificationTypeBlocked,

    #[error("verification type is not supported")]
    NotSupported,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Stable machine-readable tag for this condition.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidToken => "invalid_token",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Deleted => "deleted",
            Self::AlreadyUsed(_) => "already_used",
            Self::InvalidPassword => "invalid_password",
            Self::InvalidTotp => "invalid_totp",
            Self::InvalidBackupCode => "invalid_backup_code",
            Self::TotpNotEnabled => "totp_not_enabled",
            Self::TotpAlreadyEnabled => "totp_already_enabled",
            Self::TotpNotPending => "totp_not_found",
            Self::VerificationTypeBlocked => "verification_type_blocked",
            Self::NotSupported => "not_supported",
            Self::Config(_) => "invalid_configuration",
            Self::Internal(_) => "internal_error",
        }
    }
}
