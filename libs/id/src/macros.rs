//! Macros for defining validated name newtypes.

/// Defines a newtype wrapper around a validated name string.
///
/// This generates:
/// - `parse()` / `FromStr` enforcing the charset (ASCII alphanumerics, `-`, `_`, `.`) and a
///   maximum length
/// - `Display` and `AsRef<str>`
/// - `Serialize` / `Deserialize` via the string form
///
/// # Example
///
/// ```ignore
/// define_name!(ApplicationName, 255);
///
/// let name: ApplicationName = "demo".parse()?;
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $max_len:expr) => {
        /// A validated name.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The maximum length (in bytes) allowed for this name.
            pub const MAX_LEN: usize = $max_len;

            /// Parses and validates a name from a string.
            pub fn parse(s: impl Into<String>) -> Result<Self, $crate::NameError> {
                let s = s.into();

                if s.is_empty() {
                    return Err($crate::NameError::Empty);
                }

                if s.len() > Self::MAX_LEN {
                    return Err($crate::NameError::TooLong {
                        max: Self::MAX_LEN,
                        actual: s.len(),
                    });
                }

                if let Some(c) = s
                    .chars()
                    .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
                {
                    return Err($crate::NameError::InvalidCharacter(c));
                }

                Ok(Self(s))
            }

            /// Returns the name as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(s).map_err(serde::de::Error::custom)
            }
        }
    };
}
