//! Deterministic names for local scratch files.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `input`.
pub fn name_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
