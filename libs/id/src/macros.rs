//! Macros for defining typed ID types.

/// Defines a typed, string-backed identifier.
///
/// This generates a newtype wrapper around `String` with:
/// - `parse()` with validation (non-empty, no whitespace or control chars)
/// - `as_str()` and `into_inner()` accessors
/// - `Display` and `FromStr` implementations
/// - `Serialize`/`Deserialize` in the `{"value": "..."}` wire shape
///
/// # Example
///
/// ```ignore
/// define_id!(AgentId);
///
/// let agent: AgentId = "S0".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        /// An opaque identifier assigned by the cluster manager.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Parses an ID from a string.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                if let Some((position, character)) = s
                    .char_indices()
                    .find(|(_, c)| c.is_whitespace() || c.is_control())
                {
                    return Err($crate::IdError::InvalidCharacter {
                        character,
                        position,
                    });
                }

                Ok(Self(s.to_string()))
            }

            /// Returns the raw string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the ID and returns the raw string value.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serde::Serialize::serialize(&$crate::__private::Wire { value: &self.0 }, serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let wire =
                    <$crate::__private::OwnedWire as serde::Deserialize>::deserialize(deserializer)?;
                Self::parse(&wire.value).map_err(serde::de::Error::custom)
            }
        }
    };
}

#[doc(hidden)]
pub mod __private {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    pub struct Wire<'a> {
        pub value: &'a str,
    }

    #[derive(Deserialize)]
    pub struct OwnedWire {
        pub value: String,
    }
}
