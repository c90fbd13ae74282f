//! Password digest computation and comparison.

use sha2::{Digest, Sha256, Sha512};

use crate::error::Error;

/// One-way digest algorithm used for stored passwords.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PasswordAlgorithm {
    Sha256,
    Sha512,
}

impl PasswordAlgorithm {
    /// Parse the configured algorithm identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown identifier.
    pub fn from_identifier(value: &str) -> Result<Self, Error> {
        match value.trim().to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::Config(format!(
                "unknown password hash algorithm: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// Computes and compares password digests under one configured algorithm.
#[derive(Clone, Copy, Debug)]
pub struct PasswordHasher {
    algorithm: PasswordAlgorithm,
}

impl PasswordHasher {
    #[must_use]
    pub fn new(algorithm: PasswordAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Digest a plaintext password for storage.
    #[must_use]
    pub fn hash(&self, plaintext: &str) -> Vec<u8> {
        match self.algorithm {
            PasswordAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(plaintext.as_bytes());
                hasher.finalize().to_vec()
            }
            PasswordAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(plaintext.as_bytes());
                hasher.finalize().to_vec()
            }
        }
    }

    /// Recompute the digest of `candidate` and compare against `stored`.
    ///
    /// The comparison always walks the full digest length; it never exits
    /// on the first mismatching byte.
    #[must_use]
    pub fn verify(&self, stored: &[u8], candidate: &str) -> bool {
        let computed = self.hash(candidate);
        if stored.len() != computed.len() {
            return false;
        }
        stored
            .iter()
            .zip(computed.iter())
            .fold(0u8, |acc, (left, right)| acc | (left ^ right))
            == 0
    }
}
