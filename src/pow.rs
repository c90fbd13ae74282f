//! Proof-of-work difficulty over SHA-512 digests.
//!
//! A proof is any string whose digest starts with enough zero bits. The
//! difficulty of a string is the count of consecutive leading zero bits of
//! its digest, scanned most-significant-bit first; the expected work to find
//! a proof of difficulty `n` is `2^n` hash attempts.

use sha2::{Digest, Sha512};

/// Digest length in bytes.
pub const DIGEST_LEN: usize = 64;

/// SHA-512 digest of `data`.
#[must_use]
pub fn hash(data: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha512::new();
    hasher.update(data.as_bytes());
    hasher.finalize().into()
}

/// Count of consecutive leading zero bits in `hash(data)`.
///
/// Scanning stops at the first set bit, so the result is at most
/// `DIGEST_LEN * 8`.
#[must_use]
pub fn difficulty(data: &str) -> u32 {
    let digest = hash(data);
    let mut bits = 0u32;
    for byte in digest {
        if byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Whether the first `required` bits of `hash(data)` are all zero.
///
/// Computed by an independent bitwise scan rather than by comparing against
/// [`difficulty`]; a `required` larger than the digest width never passes.
#[must_use]
pub fn check(data: &str, required: u32) -> bool {
    if required as usize > DIGEST_LEN * 8 {
        return false;
    }
    let digest = hash(data);
    for bit in 0..required {
        let byte = (bit >> 3) as usize;
        let offset = bit & 0b111;
        if digest[byte] & (1 << (7 - offset)) != 0 {
            return false;
        }
    }
    true
}

/// Expected number of hash attempts to find a proof of `difficulty`.
#[must_use]
pub fn estimate_work(difficulty: u32) -> f64 {
    2f64.powi(difficulty as i32)
}

/// Expected seconds to find a proof of `difficulty` at `hashes_per_second`.
///
/// Reporting only; nothing in the engine enforces a time budget.
#[must_use]
pub fn estimate_seconds(difficulty: u32, hashes_per_second: u64) -> f64 {
    estimate_work(difficulty) / hashes_per_second.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::{check, difficulty, estimate_seconds, estimate_work, hash, DIGEST_LEN};

    #[test]
    fn empty_string_reference_difficulty() {
        // SHA-512("") begins with 0xcf, so no leading zero bits.
        assert_eq!(hash("")[0], 0xcf);
        assert_eq!(difficulty(""), 0);
    }

    #[test]
    fn known_difficulties() {
        // First bytes: "1" -> 0x4d, "0" -> 0x31, "61" -> 0x00, "1533" -> one
        // zero byte then 0x04.
        assert_eq!(difficulty("1"), 1);
        assert_eq!(difficulty("0"), 2);
        assert_eq!(difficulty("61"), 8);
        assert_eq!(difficulty("1533"), 13);
    }

    #[test]
    fn check_zero_always_passes() {
        for data in ["", "anything", "61"] {
            assert!(check(data, 0));
        }
    }

    #[test]
    fn check_agrees_with_difficulty() {
        for data in ["", "1", "0", "61", "1533", "hello"] {
            let bits = difficulty(data);
            assert!(check(data, bits), "{data} must pass at its own difficulty");
            assert!(
                !check(data, bits + 1),
                "{data} must fail one bit past its difficulty"
            );
        }
    }

    #[test]
    fn check_rejects_impossible_requirements() {
        assert!(!check("61", (DIGEST_LEN * 8) as u32 + 1));
    }

    #[test]
    fn work_doubles_per_bit() {
        assert_eq!(estimate_work(0), 1.0);
        assert_eq!(estimate_work(10), 1024.0);
        assert_eq!(estimate_work(11), 2.0 * estimate_work(10));
    }

    #[test]
    fn seconds_scale_with_speed() {
        assert_eq!(estimate_seconds(10, 1024), 1.0);
        assert_eq!(estimate_seconds(10, 0), 1024.0);
    }
}
