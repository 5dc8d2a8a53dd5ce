//! Content fingerprints: the sole identity of an uploaded image.
//!
//! A fingerprint is the SHA-256 digest of the complete upload, rendered as
//! 64 lowercase hex characters. Byte-identical uploads map to the same
//! fingerprint, and therefore to the same cached result, regardless of file
//! name or upload time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Hex-encoded SHA-256 digest of an image's bytes.
///
/// Deserialisation goes through [`Fingerprint::parse`], so every value of
/// this type is a well-formed digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

/// A string that is not 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid fingerprint '{0}': expected 64 lowercase hex characters")]
pub struct InvalidFingerprint(pub String);

impl Fingerprint {
    /// Length of the hex rendering.
    pub const HEX_LEN: usize = 64;

    /// Fingerprint the full byte content of an upload.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(format!("{digest:x}"))
    }

    /// Parse a previously rendered fingerprint.
    ///
    /// Accepts exactly 64 lowercase hex digits, so a parsed value can never
    /// escape the store directory when used as a path component.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard prefix used to fan out the on-disk store.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = InvalidFingerprint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidFingerprint(s.to_string()))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = InvalidFingerprint;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
