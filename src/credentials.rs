//! Credential verification and management.
//!
//! Owns password digests, recovery codes and the TOTP secret lifecycle,
//! including the generate → verify → commit onboarding handshake. Secrets
//! pending confirmation live in a process-local, mutex-guarded table with a
//! short expiry; they are removed on successful confirmation, explicit
//! cancellation, or when found expired on read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{rngs::OsRng, RngCore};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Error;
use crate::password::PasswordHasher;
use crate::store::{AccountRecord, NewAccount, RecordStore};
use crate::totp::TotpEngine;

/// Number of recovery codes issued at account creation.
pub const RECOVERY_CODE_COUNT: usize = 50;
/// Length of each recovery code.
pub const RECOVERY_CODE_LENGTH: usize = 16;
pub(crate) const MIN_PASSWORD_LENGTH: usize = 8;

const RECOVERY_CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A generated TOTP secret awaiting its confirmation code.
struct PendingSecret {
    secret: String,
    created_at: Instant,
}

/// Result of starting TOTP enrollment.
#[derive(Clone, Debug)]
pub struct TotpEnrollment {
    /// Base32 shared secret for manual entry.
    pub secret: String,
    /// otpauth provisioning URL for authenticator apps.
    pub otpauth_url: String,
}

/// Proof accepted for disabling TOTP.
#[derive(Clone, Debug)]
pub enum TotpDisableProof {
    Totp(String),
    BackupCode(String),
}

/// The credential store: password, TOTP secret and recovery-code handling
/// for the accounts behind the record store.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn RecordStore>,
    hasher: PasswordHasher,
    totp: TotpEngine,
    pending: Arc<Mutex<HashMap<Uuid, PendingSecret>>>,
    pending_ttl: Duration,
}

impl Credentials {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        hasher: PasswordHasher,
        totp: TotpEngine,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            store,
            hasher,
            totp,
            pending: Arc::new(Mutex::new(HashMap::new())),
            pending_ttl,
        }
    }

    /// Create the credential set for a freshly registered user: hashed
    /// password, no TOTP secret, and a full batch of recovery codes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store insert fails.
    pub async fn create_for_user(
        &self,
        user_id: Uuid,
        password: &str,
    ) -> Result<AccountRecord, Error> {
        let account = self
            .store
            .create_account(NewAccount {
                user_id,
                password_hash: self.hasher.hash(password),
                otp_secret: None,
                recovery_codes: generate_recovery_codes(),
            })
            .await?;
        Ok(account)
    }

    /// Recompute the digest of `candidate` and compare it against the
    /// account's stored hash.
    #[must_use]
    pub fn verify_password(&self, account: &AccountRecord, candidate: &str) -> bool {
        self.hasher.verify(&account.password_hash, candidate)
    }

    /// Hash and persist a new password for the account.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store update fails.
    pub async fn set_password(&self, account: &AccountRecord, plaintext: &str) -> Result<(), Error> {
        self.store
            .update_password(account.id, &self.hasher.hash(plaintext))
            .await?;
        Ok(())
    }

    /// Replace the password after checking the current one.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user has no account, `Error::InvalidPassword`
    /// when the current password does not match, `Error::InvalidRequest` when
    /// the new password is too short.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<(), Error> {
        if new.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::InvalidRequest(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        let account = self.account_for(user_id).await?;
        if !self.verify_password(&account, current) {
            return Err(Error::InvalidPassword);
        }
        self.set_password(&account, new).await
    }

    /// Enable or disable the account's TOTP secret.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the store update fails.
    pub async fn set_otp_secret(
        &self,
        account: &AccountRecord,
        secret: Option<&str>,
    ) -> Result<(), Error> {
        self.store.update_otp_secret(account.id, secret).await?;
        Ok(())
    }

    /// Whether `code` is present in the account's recovery-code list; when
    /// `consume` is set a matching code is removed so it cannot be reused.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if persisting the consumption fails; in
    /// that case the code has not been spent.
    pub async fn use_recovery_code(
        &self,
        account: &AccountRecord,
        code: &str,
        consume: bool,
    ) -> Result<bool, Error> {
        let Some(index) = account
            .recovery_codes
            .iter()
            .position(|candidate| candidate == code)
        else {
            return Ok(false);
        };
        if consume {
            let mut remaining = account.recovery_codes.clone();
            remaining.remove(index);
            self.store
                .update_recovery_codes(account.id, &remaining)
                .await?;
        }
        Ok(true)
    }

    /// Whether the user has a committed TOTP secret.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user has no account.
    pub async fn totp_status(&self, user_id: Uuid) -> Result<bool, Error> {
        let account = self.account_for(user_id).await?;
        Ok(account.otp_secret.is_some())
    }

    /// First step of the enable-TOTP handshake: generate a secret, park it
    /// in the pending table and hand it to the caller for provisioning.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user has no account,
    /// `Error::TotpAlreadyEnabled` when a secret is already committed.
    pub async fn begin_totp_enrollment(&self, user_id: Uuid) -> Result<TotpEnrollment, Error> {
        let account = self.account_for(user_id).await?;
        if account.otp_secret.is_some() {
            return Err(Error::TotpAlreadyEnabled);
        }

        let secret = self.totp.generate_secret()?;
        let instance = self.totp.instance(&secret)?;
        let otpauth_url = self.totp.provisioning_url(&instance);

        let mut pending = self.pending.lock().await;
        // Concurrent enrollments for the same user race last-write-wins.
        pending.retain(|_, entry| entry.created_at.elapsed() < self.pending_ttl);
        pending.insert(
            user_id,
            PendingSecret {
                secret: secret.clone(),
                created_at: Instant::now(),
            },
        );

        Ok(TotpEnrollment {
            secret,
            otpauth_url,
        })
    }

    /// Final step of the handshake: the first valid code plus the account
    /// password commit the pending secret.
    ///
    /// # Errors
    ///
    /// `Error::TotpNotPending` when no fresh pending secret exists,
    /// `Error::InvalidTotp` for a bad code, `Error::InvalidPassword` for a
    /// bad password, `Error::TotpAlreadyEnabled` when a secret is already
    /// committed.
    pub async fn confirm_totp_enrollment(
        &self,
        user_id: Uuid,
        code: &str,
        password: &str,
    ) -> Result<(), Error> {
        let account = self.account_for(user_id).await?;
        if account.otp_secret.is_some() {
            return Err(Error::TotpAlreadyEnabled);
        }

        let Some(secret) = self.pending_secret(user_id).await else {
            return Err(Error::TotpNotPending);
        };

        let instance = self.totp.instance(&secret)?;
        if !self.totp.verify(&instance, code) {
            // The pending secret stays parked; the user may retry until it
            // expires.
            return Err(Error::InvalidTotp);
        }
        if !self.verify_password(&account, password) {
            return Err(Error::InvalidPassword);
        }

        self.set_otp_secret(&account, Some(&secret)).await?;
        self.pending.lock().await.remove(&user_id);
        Ok(())
    }

    /// Abandon a pending enrollment.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user has no account,
    /// `Error::TotpAlreadyEnabled` when a secret is already committed.
    pub async fn cancel_totp_enrollment(&self, user_id: Uuid) -> Result<(), Error> {
        let account = self.account_for(user_id).await?;
        if account.otp_secret.is_some() {
            return Err(Error::TotpAlreadyEnabled);
        }
        self.pending.lock().await.remove(&user_id);
        Ok(())
    }

    /// Disable TOTP after checking a current code or a recovery code.
    ///
    /// The recovery code is checked but not consumed here.
    ///
    /// # Errors
    ///
    /// `Error::TotpNotEnabled` when no secret is committed,
    /// `Error::InvalidTotp` / `Error::InvalidBackupCode` for a bad proof.
    pub async fn disable_totp(
        &self,
        user_id: Uuid,
        proof: TotpDisableProof,
    ) -> Result<(), Error> {
        let account = self.account_for(user_id).await?;
        let Some(secret) = account.otp_secret.as_deref() else {
            return Err(Error::TotpNotEnabled);
        };

        match proof {
            TotpDisableProof::Totp(code) => {
                let instance = self.totp.instance(secret)?;
                if !self.totp.verify(&instance, &code) {
                    return Err(Error::InvalidTotp);
                }
            }
            TotpDisableProof::BackupCode(code) => {
                if !self.use_recovery_code(&account, &code, false).await? {
                    return Err(Error::InvalidBackupCode);
                }
            }
        }

        self.set_otp_secret(&account, None).await
    }

    /// Fetch the pending secret for a user, dropping it if expired.
    async fn pending_secret(&self, user_id: Uuid) -> Option<String> {
        let mut pending = self.pending.lock().await;
        match pending.get(&user_id) {
            Some(entry) if entry.created_at.elapsed() < self.pending_ttl => {
                Some(entry.secret.clone())
            }
            Some(_) => {
                pending.remove(&user_id);
                None
            }
            None => None,
        }
    }

    async fn account_for(&self, user_id: Uuid) -> Result<AccountRecord, Error> {
        self.store
            .account_by_user_id(user_id)
            .await?
            .ok_or(Error::NotFound("account"))
    }
}

/// Generate a fresh recovery-code batch.
#[must_use]
pub fn generate_recovery_codes() -> Vec<String> {
    (0..RECOVERY_CODE_COUNT)
        .map(|_| generate_recovery_code(&mut OsRng))
        .collect()
}

fn generate_recovery_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; RECOVERY_CODE_LENGTH];
    rng.fill_bytes(&mut raw);
    raw.iter()
        .map(|byte| {
            let index = usize::from(*byte) % RECOVERY_CODE_ALPHABET.len();
            RECOVERY_CODE_ALPHABET[index] as char
        })
        .collect()
}
