//! Deterministic capability tokens for shared links.
//!
//! A token is a function of the server secret and a resource path only: it
//! never expires and cannot be revoked short of rotating the secret. Anyone
//! holding the secret can mint a token for any path.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::core::errors::{Result, WstError};

/// Length of a token in hex characters.
pub const TOKEN_LEN: usize = 40;

#[derive(Clone)]
pub struct TokenService {
    key_hash: String,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}

impl TokenService {
    /// Build from the secret itself. Case and surrounding whitespace are ignored.
    pub fn new(secret: &str) -> Result<Self> {
        let normalized = secret.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(WstError::InvalidConfig {
                details: "token secret is empty".to_string(),
            });
        }
        Ok(Self {
            key_hash: sha1_hex(normalized.as_bytes()),
        })
    }

    /// Build from a secret file such as `/resources/private-key.pub`.
    pub fn from_secret_file(path: &Path) -> Result<Self> {
        let secret = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                WstError::InvalidConfig {
                    details: format!("token secret file not found: {}", path.display()),
                }
            } else {
                WstError::io(path, source)
            }
        })?;
        Self::new(&secret)
    }

    /// Token granting access to `path`.
    #[must_use]
    pub fn derive(&self, path: &str) -> String {
        let material = format!("{}{path}", self.key_hash).to_lowercase();
        sha1_hex(material.trim().as_bytes())
    }

    /// Whether `candidate` is the token for `path`. Case and surrounding
    /// whitespace of the candidate are ignored.
    #[must_use]
    pub fn validate(&self, candidate: &str, path: &str) -> bool {
        let candidate = candidate.trim().to_lowercase();
        constant_time_eq(candidate.as_bytes(), self.derive(path).as_bytes())
    }
}

fn sha1_hex(data: &[u8]) -> String {
    hex_encode(&Sha1::digest(data))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
