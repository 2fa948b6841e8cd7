//! Schema version identifiers
//!
//! Every persisted record carries the version of the code that wrote it.
//! Readers compare that tag against the version their code expects and run
//! the migration chain when they differ.
//!
//! ## Format
//!
//! Versions are `MAJOR.MINOR.PATCH` with numeric components. They serialize
//! as plain strings (`"0.3.0"`) so the on-disk representation stays readable.
//!
//! ## Comparison
//!
//! Ordering is numeric per component, major first: `0.10.0 > 0.9.0`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Semantic schema version
///
/// ## Invariants
///
/// - Always three numeric components
/// - Total order, major first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
}

impl Version {
    /// Create a version from its components
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// Parse a `MAJOR.MINOR.PATCH` string
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` if the string has the wrong number of
    /// components or a component is not a non-negative integer.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let mut next = |label: &str| -> Result<u64> {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidDocument(format!("version '{}' has no {}", s, label)))?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidDocument(format!(
                    "version '{}' has a non-numeric {} component",
                    s, label
                )));
            }
            part.parse::<u64>()
                .map_err(|e| Error::InvalidDocument(format!("version '{}': {}", s, e)))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;

        if parts.next().is_some() {
            return Err(Error::InvalidDocument(format!(
                "version '{}' has more than three components",
                s
            )));
        }

        Ok(Version::new(major, minor, patch))
    }

    /// Major component
    #[inline]
    pub const fn major(&self) -> u64 {
        self.major
    }

    /// Minor component
    #[inline]
    pub const fn minor(&self) -> u64 {
        self.minor
    }

    /// Patch component
    #[inline]
    pub const fn patch(&self) -> u64 {
        self.patch
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_display() {
        let v = Version::parse("0.3.0").unwrap();
        assert_eq!(v, Version::new(0, 3, 0));
        assert_eq!(v.to_string(), "0.3.0");
        assert_eq!((v.major(), v.minor(), v.patch()), (0, 3, 0));
    }

    #[test]
    fn test_version_parse_rejects_malformed() {
        for bad in ["", "1", "1.2", "1.2.3.4", "a.b.c", "1.-2.3", "1..3", " 1.2.3"] {
            assert!(Version::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(Version::new(0, 10, 0) > Version::new(0, 9, 0));
        assert!(Version::new(1, 0, 0) > Version::new(0, 99, 99));
        assert!(Version::new(0, 1, 2) < Version::new(0, 1, 10));
    }

    #[test]
    fn test_version_serde_as_string() {
        let v = Version::new(0, 4, 0);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"0.4.0\"");

        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);

        assert!(serde_json::from_str::<Version>("\"nope\"").is_err());
    }

    #[test]
    fn test_version_from_str() {
        let v: Version = "2.0.1".parse().unwrap();
        assert_eq!(v, Version::new(2, 0, 1));
    }

    mod ordering {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_ordering_follows_components(
                a in (0u64..50, 0u64..50, 0u64..50),
                b in (0u64..50, 0u64..50, 0u64..50),
            ) {
                let va = Version::new(a.0, a.1, a.2);
                let vb = Version::new(b.0, b.1, b.2);
                prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
                prop_assert_eq!(Version::parse(&va.to_string()).unwrap(), va);
            }
        }
    }
}
