//! Validated name types for routing-table resources.
//!
//! Application and backend names are operator-chosen labels, not system-generated IDs, so
//! unlike a ULID-based identifier they are validated for charset and length rather than parsed
//! out of a fixed binary layout.

use crate::define_name;

define_name!(ApplicationName, 255);
define_name!(BackendName, 255);

/// A request hostname, normalized for routing-table lookups.
///
/// Normalization strips a trailing dot and lowercases the ASCII portion, mirroring how a
/// client's `Host` header is matched against the routing table regardless of case or an
/// explicit `:port` suffix (the port is stripped by the caller before construction).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hostname(String);

impl Hostname {
    /// Normalizes and validates a hostname.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, crate::NameError> {
        let raw = s.as_ref().trim_end_matches('.');
        if raw.is_empty() {
            return Err(crate::NameError::Empty);
        }
        if raw.len() > 255 {
            return Err(crate::NameError::TooLong {
                max: 255,
                actual: raw.len(),
            });
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.')))
        {
            return Err(crate::NameError::InvalidCharacter(c));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Returns the normalized hostname as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Hostname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Hostname {
    type Err = crate::NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Hostname {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for Hostname {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Hostname {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(s).map_err(serde::de::Error::custom)
    }
}
