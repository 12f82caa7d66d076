//! Core identifier types for nodepool.
//!
//! Pools are named by operators and double as provider label values, so
//! [`PoolId`] only admits label-safe names. Instances are identified by the
//! numeric id the provider assigns and rendered as a provider-qualified
//! string (`hcloud://<id>`) whenever they leave the reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of provider-qualified instance identifiers.
pub const PROVIDER_ID_PREFIX: &str = "hcloud://";

/// Maximum length of a label value accepted by the provider.
const MAX_POOL_ID_LEN: usize = 63;

/// The name of a node pool.
///
/// Pool ids are used verbatim as the value of the pool label attached to every
/// instance, so they must be valid label values: 1 to 63 characters drawn from
/// ASCII alphanumerics, `-`, `_` and `.`, starting and ending with an
/// alphanumeric character.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PoolId(String);

impl PoolId {
    /// Parse and validate a pool id.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long, or not label-safe.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdError::Empty);
        }
        if name.len() > MAX_POOL_ID_LEN {
            return Err(IdError::TooLong {
                max: MAX_POOL_ID_LEN,
                got: name.len(),
            });
        }

        let bytes = name.as_bytes();
        let edge_ok = bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric();
        let body_ok = bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if !edge_ok || !body_ok {
            return Err(IdError::InvalidPoolName(name));
        }

        Ok(Self(name))
    }

    /// Return the pool name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PoolId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PoolId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PoolId> for String {
    fn from(id: PoolId) -> Self {
        id.0
    }
}

impl AsRef<str> for PoolId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A provider-assigned instance identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Create an `InstanceId` from the raw provider id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Return the raw provider id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Render the provider-qualified form, e.g. `hcloud://42`.
    #[must_use]
    pub fn provider_id(self) -> String {
        format!("{PROVIDER_ID_PREFIX}{}", self.0)
    }

    /// Parse a provider-qualified id such as `hcloud://42`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is missing or the remainder is not a
    /// number.
    pub fn from_provider_id(s: &str) -> Result<Self, IdError> {
        let raw = s
            .strip_prefix(PROVIDER_ID_PREFIX)
            .ok_or_else(|| IdError::InvalidProviderId(s.to_string()))?;
        raw.parse::<u64>()
            .map(Self)
            .map_err(|_| IdError::InvalidProviderId(s.to_string()))
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InstanceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The pool name is empty.
    #[error("pool name must not be empty")]
    Empty,

    /// The pool name exceeds the label length limit.
    #[error("pool name too long: max {max} characters, got {got}")]
    TooLong {
        /// The maximum number of characters.
        max: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The pool name contains characters that are not label-safe.
    #[error("invalid pool name: {0}")]
    InvalidPoolName(String),

    /// The provider id is not of the form `hcloud://<number>`.
    #[error("invalid provider id: {0}")]
    InvalidProviderId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_id_accepts_label_safe_names() {
        for name in ["pool1", "workers-arm", "a", "cx22.fsn1_pool"] {
            assert!(PoolId::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn pool_id_rejects_bad_names() {
        assert_eq!(PoolId::new(""), Err(IdError::Empty));
        assert!(matches!(PoolId::new("-pool"), Err(IdError::InvalidPoolName(_))));
        assert!(matches!(PoolId::new("pool-"), Err(IdError::InvalidPoolName(_))));
        assert!(matches!(PoolId::new("po ol"), Err(IdError::InvalidPoolName(_))));
        assert!(matches!(
            PoolId::new("x".repeat(64)),
            Err(IdError::TooLong { max: 63, got: 64 })
        ));
    }

    #[test]
    fn pool_id_serde_json() {
        let id = PoolId::new("pool1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"pool1\"");
        let parsed: PoolId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);

        assert!(serde_json::from_str::<PoolId>("\"bad name\"").is_err());
    }

    #[test]
    fn instance_id_provider_form() {
        let id = InstanceId::new(4242);
        assert_eq!(id.provider_id(), "hcloud://4242");
        assert_eq!(InstanceId::from_provider_id("hcloud://4242"), Ok(id));
    }

    #[test]
    fn instance_id_rejects_foreign_provider_ids() {
        assert!(InstanceId::from_provider_id("aws:///eu-west-1a/i-123").is_err());
        assert!(InstanceId::from_provider_id("hcloud://").is_err());
        assert!(InstanceId::from_provider_id("hcloud://abc").is_err());
        assert!(InstanceId::from_provider_id("4242").is_err());
    }
}
