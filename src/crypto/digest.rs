//! SHA-256 digest helpers.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 of `body` and return it hex-encoded.
pub fn sha256_hex(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Compare a body against an expected hex digest.
///
/// Comparison is case-insensitive on the hex text; a malformed expectation
/// simply fails to match.
pub fn digest_matches(body: &[u8], expected_hex: &str) -> bool {
    sha256_hex(body).eq_ignore_ascii_case(expected_hex.trim())
}
