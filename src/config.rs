//! Engine configuration, loaded once at process start and immutable after.

use chrono::{DateTime, Duration, Months, Utc};
use secrecy::SecretString;

use crate::error::Error;
use crate::password::PasswordAlgorithm;
use crate::totp::{TotpAlgorithm, TotpConfig};

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_LOGIN_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_ACCESS_ISSUER: &str = "ensaluti/access";
const DEFAULT_REFRESH_ISSUER: &str = "ensaluti/refresh";
const DEFAULT_LOGIN_ISSUER: &str = "ensaluti/login";
const DEFAULT_SESSION_EXPIRATION: &str = "1d";
const DEFAULT_SESSION_TOKEN_LENGTH: usize = 64;
const DEFAULT_HASHING_SPEED: u64 = 1000;

/// Secret, issuer and lifetime for one bearer-token kind.
#[derive(Clone, Debug)]
pub struct TokenKindConfig {
    secret: SecretString,
    issuer: String,
    ttl_seconds: i64,
}

impl TokenKindConfig {
    #[must_use]
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            issuer: issuer.into(),
            ttl_seconds,
        }
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.secret
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }
}

/// Per-kind token configuration for access, refresh and login tokens.
#[derive(Clone, Debug)]
pub struct TokenSettings {
    access: TokenKindConfig,
    refresh: TokenKindConfig,
    login: TokenKindConfig,
}

impl TokenSettings {
    #[must_use]
    pub fn new(access: TokenKindConfig, refresh: TokenKindConfig, login: TokenKindConfig) -> Self {
        Self {
            access,
            refresh,
            login,
        }
    }

    /// Build settings from three secrets with the default issuers and TTLs.
    #[must_use]
    pub fn from_secrets(
        access: impl Into<String>,
        refresh: impl Into<String>,
        login: impl Into<String>,
    ) -> Self {
        Self::new(
            TokenKindConfig::new(access, DEFAULT_ACCESS_ISSUER, DEFAULT_ACCESS_TTL_SECONDS),
            TokenKindConfig::new(refresh, DEFAULT_REFRESH_ISSUER, DEFAULT_REFRESH_TTL_SECONDS),
            TokenKindConfig::new(login, DEFAULT_LOGIN_ISSUER, DEFAULT_LOGIN_TTL_SECONDS),
        )
    }

    #[must_use]
    pub fn access(&self) -> &TokenKindConfig {
        &self.access
    }

    #[must_use]
    pub fn refresh(&self) -> &TokenKindConfig {
        &self.refresh
    }

    #[must_use]
    pub fn login(&self) -> &TokenKindConfig {
        &self.login
    }
}

/// How long a freshly created session lives.
///
/// Parsed from expressions such as `"1d"`, `"2w"`, `"3m"`, `"1y"`; a bare
/// number counts days. Month and year arithmetic is calendar-aware.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionLifetime {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

impl SessionLifetime {
    /// Parse a lifetime expression.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for anything that is not digits followed by
    /// an optional unit in `d`, `w`, `m`, `y`.
    pub fn parse(expr: &str) -> Result<Self, Error> {
        let cleaned = expr.replace(' ', "").to_lowercase();
        let split = cleaned
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(cleaned.len());
        let (digits, unit) = cleaned.split_at(split);
        if digits.is_empty() {
            return Err(Error::Config(format!(
                "invalid session expiration time: {expr}"
            )));
        }
        let amount: u32 = digits
            .parse()
            .map_err(|_| Error::Config(format!("invalid session expiration time: {expr}")))?;
        match unit {
            "" | "d" => Ok(Self::Days(amount)),
            "w" => Ok(Self::Weeks(amount)),
            "m" => Ok(Self::Months(amount)),
            "y" => Ok(Self::Years(amount)),
            _ => Err(Error::Config(format!(
                "invalid session expiration time: {expr}"
            ))),
        }
    }

    /// Expiry timestamp for a session created at `from`.
    #[must_use]
    pub fn expires_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let expires = match self {
            Self::Days(days) => from.checked_add_signed(Duration::days(i64::from(*days))),
            Self::Weeks(weeks) => from.checked_add_signed(Duration::weeks(i64::from(*weeks))),
            Self::Months(months) => from.checked_add_months(Months::new(*months)),
            Self::Years(years) => from.checked_add_months(Months::new(years.saturating_mul(12))),
        };
        expires.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Session creation parameters.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    expiration: String,
    token_length: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            expiration: DEFAULT_SESSION_EXPIRATION.to_string(),
            token_length: DEFAULT_SESSION_TOKEN_LENGTH,
        }
    }

    #[must_use]
    pub fn with_expiration(mut self, expression: impl Into<String>) -> Self {
        self.expiration = expression.into();
        self
    }

    #[must_use]
    pub fn with_token_length(mut self, token_length: usize) -> Self {
        self.token_length = token_length;
        self
    }

    /// Parse the configured lifetime expression.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a malformed expression; this is checked
    /// once at engine construction, never per request.
    pub fn lifetime(&self) -> Result<SessionLifetime, Error> {
        SessionLifetime::parse(&self.expiration)
    }

    #[must_use]
    pub fn token_length(&self) -> usize {
        self.token_length
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The full configuration surface of the engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    tokens: TokenSettings,
    session: SessionConfig,
    password_algorithm: PasswordAlgorithm,
    totp: TotpConfig,
    hashing_speed: u64,
}

impl EngineConfig {
    #[must_use]
    pub fn new(tokens: TokenSettings) -> Self {
        Self {
            tokens,
            session: SessionConfig::new(),
            password_algorithm: PasswordAlgorithm::Sha512,
            totp: TotpConfig::new(),
            hashing_speed: DEFAULT_HASHING_SPEED,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_password_algorithm(mut self, algorithm: PasswordAlgorithm) -> Self {
        self.password_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_totp(mut self, totp: TotpConfig) -> Self {
        self.totp = totp;
        self
    }

    /// Assumed client hashing speed, used only for work estimates.
    #[must_use]
    pub fn with_hashing_speed(mut self, hashes_per_second: u64) -> Self {
        self.hashing_speed = hashes_per_second;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenSettings {
        &self.tokens
    }

    #[must_use]
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    #[must_use]
    pub fn password_algorithm(&self) -> PasswordAlgorithm {
        self.password_algorithm
    }

    #[must_use]
    pub fn totp(&self) -> &TotpConfig {
        &self.totp
    }

    #[must_use]
    pub fn hashing_speed(&self) -> u64 {
        self.hashing_speed
    }

    /// Load the configuration from `ENSALUTI_*` environment variables.
    ///
    /// The three token secrets are required; everything else falls back to
    /// its default.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let access = TokenKindConfig::new(
            require_env("ENSALUTI_ACCESS_SECRET")?,
            env_var("ENSALUTI_ACCESS_ISSUER").unwrap_or_else(|| DEFAULT_ACCESS_ISSUER.to_string()),
            parse_env("ENSALUTI_ACCESS_EXPIRATION")?.unwrap_or(DEFAULT_ACCESS_TTL_SECONDS),
        );
        let refresh = TokenKindConfig::new(
            require_env("ENSALUTI_REFRESH_SECRET")?,
            env_var("ENSALUTI_REFRESH_ISSUER")
                .unwrap_or_else(|| DEFAULT_REFRESH_ISSUER.to_string()),
            parse_env("ENSALUTI_REFRESH_EXPIRATION")?.unwrap_or(DEFAULT_REFRESH_TTL_SECONDS),
        );
        let login = TokenKindConfig::new(
            require_env("ENSALUTI_LOGIN_SECRET")?,
            env_var("ENSALUTI_LOGIN_ISSUER").unwrap_or_else(|| DEFAULT_LOGIN_ISSUER.to_string()),
            parse_env("ENSALUTI_LOGIN_EXPIRATION")?.unwrap_or(DEFAULT_LOGIN_TTL_SECONDS),
        );

        let mut session = SessionConfig::new();
        if let Some(expression) = env_var("ENSALUTI_SESSION_EXPIRATION_TIME") {
            session = session.with_expiration(expression);
        }
        if let Some(length) = parse_env("ENSALUTI_SESSION_TOKEN_LENGTH")? {
            session = session.with_token_length(length);
        }

        let password_algorithm = match env_var("ENSALUTI_HASH_ALGORITHM") {
            Some(value) => PasswordAlgorithm::from_identifier(&value)?,
            None => PasswordAlgorithm::Sha512,
        };

        let mut totp = TotpConfig::new();
        if let Some(issuer) = env_var("ENSALUTI_TOTP_ISSUER") {
            totp = totp.with_issuer(issuer);
        }
        if let Some(label) = env_var("ENSALUTI_TOTP_LABEL") {
            totp = totp.with_label(label);
        }
        if let Some(algorithm) = env_var("ENSALUTI_TOTP_ALGORITHM") {
            totp = totp.with_algorithm(TotpAlgorithm::from_identifier(&algorithm)?);
        }
        if let Some(digits) = parse_env("ENSALUTI_TOTP_DIGITS")? {
            totp = totp.with_digits(digits);
        }
        if let Some(period) = parse_env("ENSALUTI_TOTP_PERIOD")? {
            totp = totp.with_period(period);
        }
        if let Some(length) = parse_env("ENSALUTI_TOTP_SECRET_LENGTH")? {
            totp = totp.with_secret_length(length);
        }
        if let Some(window) = parse_env("ENSALUTI_TOTP_VALIDATION_WINDOW")? {
            totp = totp.with_window(window);
        }

        let hashing_speed =
            parse_env("ENSALUTI_HASHING_SPEED")?.unwrap_or(DEFAULT_HASHING_SPEED);

        Ok(Self::new(TokenSettings::new(access, refresh, login))
            .with_session(session)
            .with_password_algorithm(password_algorithm)
            .with_totp(totp)
            .with_hashing_speed(hashing_speed))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn require_env(name: &str) -> Result<String, Error> {
    env_var(name).ok_or_else(|| Error::Config(format!("missing environment variable: {name}")))
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, Error> {
    match env_var(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {name}: {value}"))),
        None => Ok(None),
    }
}
