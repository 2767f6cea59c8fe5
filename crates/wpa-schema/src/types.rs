//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use crate::config::ConfigError;
use crate::naming::MARKER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// 64-character blake3 hex digest of a normalized suite configuration.
    Fingerprint
);

impl Fingerprint {
    /// Truncated 12-character prefix, used for display.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

const MAX_ID_LEN: usize = 64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Validated environment identifier.
///
/// The id is the prefix of every container and network name the environment
/// owns, so it is restricted to characters container engines accept in names
/// and must not contain the naming marker itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvironmentId(String);

impl EnvironmentId {
    pub fn parse(s: impl Into<String>) -> Result<Self, ConfigError> {
        let s = s.into();
        validate_environment_id(&s)?;
        Ok(Self(s))
    }

    /// Derive a fresh 12-hex-character id unique to this process and instant.
    pub fn generate() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(&nanos.to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        let hex = hasher.finalize().to_hex();
        Self(hex[..12].to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_environment_id(s: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEnvironmentId {
        id: s.to_owned(),
        reason: reason.to_owned(),
    };

    if s.is_empty() || s.len() > MAX_ID_LEN {
        return Err(invalid("must be 1-64 characters"));
    }
    if !s.as_bytes()[0].is_ascii_alphanumeric() {
        return Err(invalid("must start with a letter or digit"));
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
    {
        return Err(invalid("must match [a-zA-Z0-9_.-]"));
    }
    if s.contains(MARKER) {
        return Err(invalid("must not contain the naming marker '-wpa'"));
    }
    Ok(())
}

impl TryFrom<String> for EnvironmentId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EnvironmentId> for String {
    fn from(id: EnvironmentId) -> Self {
        id.0
    }
}

impl Deref for EnvironmentId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EnvironmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for EnvironmentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EnvironmentId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
