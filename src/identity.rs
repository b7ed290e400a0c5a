//! Owner identities handed to us by the authentication layer.
//!
//! This crate never mints identities. It only trusts the verified identifier
//! it is given and uses it to scope run storage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable external identifier of an authenticated owner (a verified email).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerIdentity(String);

impl OwnerIdentity {
    /// Normalizes the identifier (trimmed, lowercase). Returns `None` for
    /// blanks and for values no email address can take (inner whitespace,
    /// angle brackets).
    pub fn new(raw: &str) -> Option<Self> {
        let v = raw.trim();
        if v.is_empty() || v.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
            return None;
        }
        Some(Self(v.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is calling a store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Authenticated(OwnerIdentity),
}

impl Caller {
    pub fn from_optional(raw: Option<&str>) -> Self {
        raw.and_then(OwnerIdentity::new)
            .map(Caller::Authenticated)
            .unwrap_or(Caller::Anonymous)
    }

    pub fn owner(&self) -> Option<&OwnerIdentity> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated(o) => Some(o),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.owner().is_some()
    }
}
