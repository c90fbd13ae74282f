//! Verification factor types and their static blocking rules.
//!
//! Each factor declares which factors become disallowed once it has been
//! used within the same login attempt. The table is fixed configuration:
//! a factor always blocks its own reuse, and the TOTP family (`totp`,
//! `backup_code`) blocks both of its members so one authenticator cannot
//! satisfy the requirement twice.

use serde::{Deserialize, Serialize};

/// A factor category usable to satisfy a login step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    Password,
    Email,
    Totp,
    BackupCode,
}

impl VerificationType {
    /// All factor categories, in protocol order.
    pub const ALL: [Self; 4] = [Self::Password, Self::Email, Self::Totp, Self::BackupCode];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Email => "email",
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "password" => Some(Self::Password),
            "email" => Some(Self::Email),
            "totp" => Some(Self::Totp),
            "backup_code" => Some(Self::BackupCode),
            _ => None,
        }
    }

    /// Factors that may no longer be used once this factor has been used.
    #[must_use]
    pub fn blocks(self) -> &'static [Self] {
        match self {
            Self::Password => &[Self::Password],
            Self::Email => &[Self::Email],
            Self::Totp => &[Self::Totp, Self::BackupCode],
            Self::BackupCode => &[Self::BackupCode, Self::Totp],
        }
    }
}

/// Whether `candidate` is blocked by any factor already used in the attempt.
#[must_use]
pub fn is_blocked(previous: &[VerificationType], candidate: VerificationType) -> bool {
    previous
        .iter()
        .any(|used| used.blocks().contains(&candidate))
}

/// Factors still usable after the given ones, for intermediary responses.
#[must_use]
pub fn available_after(used: &[VerificationType]) -> Vec<VerificationType> {
    VerificationType::ALL
        .into_iter()
        .filter(|candidate| !is_blocked(used, *candidate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{available_after, is_blocked, VerificationType};

    #[test]
    fn every_type_blocks_its_own_reuse() {
        for vt in VerificationType::ALL {
            assert!(is_blocked(&[vt], vt), "{} must block itself", vt.as_str());
        }
    }

    #[test]
    fn totp_family_blocks_both_members() {
        assert!(is_blocked(&[VerificationType::Totp], VerificationType::BackupCode));
        assert!(is_blocked(&[VerificationType::BackupCode], VerificationType::Totp));
    }

    #[test]
    fn password_does_not_block_the_totp_family() {
        assert!(!is_blocked(&[VerificationType::Password], VerificationType::Totp));
        assert!(!is_blocked(&[VerificationType::Totp], VerificationType::Password));
    }

    #[test]
    fn available_after_totp_excludes_the_family() {
        let next = available_after(&[VerificationType::Totp]);
        assert_eq!(next, vec![VerificationType::Password, VerificationType::Email]);
    }

    #[test]
    fn round_trips_through_tags() {
        for vt in VerificationType::ALL {
            assert_eq!(VerificationType::from_str(vt.as_str()), Some(vt));
        }
        assert_eq!(VerificationType::from_str("sms"), None);
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        let json = serde_json::to_string(&VerificationType::BackupCode).unwrap();
        assert_eq!(json, "\"backup_code\"");
        let parsed: VerificationType = serde_json::from_str("\"totp\"").unwrap();
        assert_eq!(parsed, VerificationType::Totp);
    }
}
