//! License key generation from a prefix and a mask.
//!
//! Mask characters:
//! - `X` is replaced by one character drawn uniformly from `[A-Z0-9]`
//! - every other character (including the `-` separator) is copied verbatim
//!
//! Output is `<prefix>-<expanded mask>`. Keys are drawn from the operating
//! system CSPRNG; uniqueness is not checked here, the store's
//! `(application, key)` constraint rejects collisions at commit time.

use rand::rngs::OsRng;
use rand::Rng;

/// Alphabet substituted for each `X` in a mask.
pub const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Mask placeholder for one random character.
pub const MASK_PLACEHOLDER: char = 'X';

/// Generate one key using the OS random source.
pub fn generate_key(prefix: &str, mask: &str) -> String {
    generate_key_with(&mut OsRng, prefix, mask)
}

/// Generate one key using the given random source.
pub fn generate_key_with<R: Rng + ?Sized>(rng: &mut R, prefix: &str, mask: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + 1 + mask.len());
    key.push_str(prefix);
    key.push('-');
    for c in mask.chars() {
        if c == MASK_PLACEHOLDER {
            let idx = rng.gen_range(0..KEY_ALPHABET.len());
            key.push(KEY_ALPHABET[idx] as char);
        } else {
            key.push(c);
        }
    }
    key
}

/// Generate `count` keys with the OS random source.
pub fn generate_batch(prefix: &str, mask: &str, count: usize) -> Vec<String> {
    let mut rng = OsRng;
    (0..count)
        .map(|_| generate_key_with(&mut rng, prefix, mask))
        .collect()
}

/// Check that `key` is a possible output of `generate_key(prefix, mask)`.
pub fn matches_mask(prefix: &str, mask: &str, key: &str) -> bool {
    let Some(rest) = key
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };

    let mut expanded = rest.chars();
    for m in mask.chars() {
        let Some(c) = expanded.next() else {
            return false;
        };
        let ok = if m == MASK_PLACEHOLDER {
            c.is_ascii_uppercase() || c.is_ascii_digit()
        } else {
            c == m
        };
        if !ok {
            return false;
        }
    }
    expanded.next().is_none()
}
