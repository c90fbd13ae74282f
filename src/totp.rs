//! Time-based one-time code generation and validation.

use anyhow::{anyhow, Context};
use rand::{rngs::OsRng, RngCore};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::Error;

const DEFAULT_ISSUER: &str = "ensaluti";
const DEFAULT_LABEL: &str = "ensaluti";
const DEFAULT_DIGITS: usize = 6;
const DEFAULT_PERIOD: u64 = 30;
const DEFAULT_SECRET_LENGTH: usize = 20;
const DEFAULT_WINDOW: u8 = 1;
const DEFAULT_PENDING_TTL_SECONDS: u64 = 5 * 60;

/// Hash algorithm driving the one-time code derivation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TotpAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl TotpAlgorithm {
    /// Parse the configured algorithm identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown identifier.
    pub fn from_identifier(value: &str) -> Result<Self, Error> {
        match value.trim().to_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::Config(format!("unknown totp algorithm: {other}"))),
        }
    }

    fn as_totp_rs(self) -> Algorithm {
        match self {
            Self::Sha1 => Algorithm::SHA1,
            Self::Sha256 => Algorithm::SHA256,
            Self::Sha512 => Algorithm::SHA512,
        }
    }
}

/// Process-wide TOTP parameters, loaded once at startup.
#[derive(Clone, Debug)]
pub struct TotpConfig {
    issuer: String,
    label: String,
    algorithm: TotpAlgorithm,
    digits: usize,
    period: u64,
    secret_length: usize,
    window: u8,
    pending_ttl_seconds: u64,
}

impl TotpConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            label: DEFAULT_LABEL.to_string(),
            algorithm: TotpAlgorithm::Sha1,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            secret_length: DEFAULT_SECRET_LENGTH,
            window: DEFAULT_WINDOW,
            pending_ttl_seconds: DEFAULT_PENDING_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: TotpAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_digits(mut self, digits: usize) -> Self {
        self.digits = digits;
        self
    }

    #[must_use]
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    #[must_use]
    pub fn with_secret_length(mut self, secret_length: usize) -> Self {
        self.secret_length = secret_length;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: u8) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_pending_ttl_seconds(mut self, seconds: u64) -> Self {
        self.pending_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn secret_length(&self) -> usize {
        self.secret_length
    }

    #[must_use]
    pub fn digits(&self) -> usize {
        self.digits
    }

    #[must_use]
    pub fn pending_ttl_seconds(&self) -> u64 {
        self.pending_ttl_seconds
    }

    /// Reject parameter combinations the code derivation cannot support.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when digits fall outside 6..=8, the secret is
    /// shorter than 128 bits, or the period is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if !(6..=8).contains(&self.digits) {
            return Err(Error::Config(format!(
                "totp digits must be between 6 and 8, got {}",
                self.digits
            )));
        }
        if self.secret_length < 16 {
            return Err(Error::Config(format!(
                "totp secret length must be at least 16 bytes, got {}",
                self.secret_length
            )));
        }
        if self.period == 0 {
            return Err(Error::Config("totp period must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds and checks TOTP instances under one fixed configuration.
#[derive(Clone, Debug)]
pub struct TotpEngine {
    config: TotpConfig,
}

impl TotpEngine {
    #[must_use]
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    /// Generate a fresh shared secret, returned base32-encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the system randomness source fails.
    pub fn generate_secret(&self) -> Result<String, Error> {
        let mut bytes = vec![0u8; self.config.secret_length];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate totp secret")?;
        let totp = self.instance_from_bytes(bytes)?;
        Ok(totp.get_secret_base32())
    }

    /// Build a TOTP instance for a stored base32 secret.
    ///
    /// # Errors
    ///
    /// Secrets only reach this function from the store or the pending
    /// onboarding table, so a malformed one is an internal error.
    pub fn instance(&self, secret_base32: &str) -> Result<TOTP, Error> {
        let bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|err| Error::Internal(anyhow!("malformed totp secret: {err:?}")))?;
        self.instance_from_bytes(bytes)
    }

    fn instance_from_bytes(&self, secret: Vec<u8>) -> Result<TOTP, Error> {
        TOTP::new(
            self.config.algorithm.as_totp_rs(),
            self.config.digits,
            self.config.window,
            self.config.period,
            secret,
            Some(self.config.issuer.clone()),
            self.config.label.clone(),
        )
        .map_err(|err| Error::Internal(anyhow!("failed to build totp instance: {err:?}")))
    }

    /// Check a candidate code against the current time step, tolerating the
    /// configured clock-drift window.
    #[must_use]
    pub fn verify(&self, totp: &TOTP, candidate: &str) -> bool {
        totp.check_current(candidate).unwrap_or(false)
    }

    /// The otpauth provisioning URL for an authenticator app.
    #[must_use]
    pub fn provisioning_url(&self, totp: &TOTP) -> String {
        totp.get_url()
    }
}
