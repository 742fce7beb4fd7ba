//! Cryptographic primitives: key generation and digests.

pub mod digest;
pub mod keygen;
