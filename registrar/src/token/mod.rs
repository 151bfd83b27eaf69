//! Optimistic-concurrency tokens.
//!
//! A token is an opaque byte string stored on a record and replaced on every
//! successful write to it. Writers that supply the token they last read get
//! their write rejected with [`RegistrarError::Conflict`] if somebody else
//! wrote in between. Writers that supply nothing force the write.

use crate::error::{RegistrarError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque version token. Compared byte-for-byte.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConcurrencyToken(Vec<u8>);

impl ConcurrencyToken {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ConcurrencyToken(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| RegistrarError::Validation(format!("Malformed concurrency token: {e}")))?;
        if bytes.is_empty() {
            return Err(RegistrarError::Validation(
                "Concurrency token must not be empty".into(),
            ));
        }
        Ok(ConcurrencyToken(bytes))
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConcurrencyToken({})", self.to_base64())
    }
}

impl Serialize for ConcurrencyToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for ConcurrencyToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ConcurrencyToken::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

/// Produce a fresh token: 16 random bytes.
pub fn issue_token() -> ConcurrencyToken {
    ConcurrencyToken(uuid::Uuid::new_v4().as_bytes().to_vec())
}

/// Outcome of comparing a caller-supplied token with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// No token supplied: the write is forced.
    Skipped,
    Matched,
    Mismatch,
}

impl TokenCheck {
    pub fn is_ok(self) -> bool {
        self != TokenCheck::Mismatch
    }
}

/// Compare tokens. A supplied token against an unversioned record never matches.
pub fn validate(
    stored: Option<&ConcurrencyToken>,
    supplied: Option<&ConcurrencyToken>,
) -> TokenCheck {
    match (stored, supplied) {
        (_, None) => TokenCheck::Skipped,
        (Some(stored), Some(supplied)) if stored == supplied => TokenCheck::Matched,
        _ => TokenCheck::Mismatch,
    }
}

/// Whether a record has been assigned a token yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Unversioned,
    Versioned,
}

/// Records that carry a concurrency token.
pub trait Versioned {
    fn concurrency_token(&self) -> Option<&ConcurrencyToken>;

    fn set_concurrency_token(&mut self, token: ConcurrencyToken);

    fn version_state(&self) -> VersionState {
        match self.concurrency_token() {
            Some(_) => VersionState::Versioned,
            None => VersionState::Unversioned,
        }
    }
}

/// Reject the write with `Conflict` unless `supplied` is absent or current.
pub fn ensure_current<V: Versioned>(
    record: &V,
    supplied: Option<&ConcurrencyToken>,
    collection: &str,
    id: i64,
) -> Result<()> {
    match validate(record.concurrency_token(), supplied) {
        TokenCheck::Mismatch => Err(RegistrarError::conflict(collection, id)),
        TokenCheck::Skipped | TokenCheck::Matched => Ok(()),
    }
}

/// Install a fresh token. The store calls this on every applied write.
pub fn rotate<V: Versioned>(record: &mut V) {
    record.set_concurrency_token(issue_token());
}
