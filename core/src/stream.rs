//! Aggregate identification and versioning types.
//!
//! This module defines strong types for aggregate identity ([`AggregateId`])
//! and version control ([`Version`]) used throughout the commit protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `AggregateId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid aggregate ID: {0}")]
pub struct ParseAggregateIdError(String);

/// Unique identifier for an aggregate instance (one commit stream).
///
/// An aggregate ID names exactly one append-only commit stream in the
/// commit store. For example:
/// - `"order-12345"`
/// - `"customer-abc-def"`
/// - `"fulfillment-uuid-here"`
///
/// # Validation
///
/// - `FromStr::from_str()`: validates input (rejects empty strings)
/// - `From::from()` and `new()`: no validation (for application-controlled input)
///
/// # Examples
///
/// ```
/// use commitstream_core::stream::AggregateId;
///
/// let id = AggregateId::new("order-12345");
/// assert_eq!(id.as_str(), "order-12345");
///
/// let parsed: AggregateId = "customer-abc".parse().unwrap();
/// assert_eq!(parsed, AggregateId::new("customer-abc"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId(String);

impl AggregateId {
    /// Create a new `AggregateId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the aggregate ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `AggregateId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AggregateId {
    type Err = ParseAggregateIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseAggregateIdError(
                "Aggregate ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for AggregateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AggregateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Aggregate version for optimistic concurrency control.
///
/// A version counts the events ever applied to an aggregate: a fresh
/// aggregate is at version 0, and each applied event increments it by 1.
/// A commit records the version it was applied against (`base_version`);
/// the version after the commit is `base_version + events.len()`.
///
/// The version is the single correctness guard against lost updates: an
/// append whose base version does not match the stream's current version
/// is rejected as a concurrency conflict.
///
/// # Examples
///
/// ```
/// use commitstream_core::stream::Version;
///
/// let v0 = Version::INITIAL;
/// let v3 = v0 + 3;
/// assert_eq!(v3.value(), 3);
/// assert_eq!(v3 - 2, Version::new(1));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The initial version (0) of a freshly constructed aggregate.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    ///
    /// # Overflow Behavior
    ///
    /// Reaching `u64::MAX` events on one stream is not a realistic concern;
    /// plain addition is used.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// # Underflow Behavior
///
/// Caller is responsible for ensuring subtraction doesn't underflow below 0;
/// the repository only subtracts the staged-event count it just measured.
impl std::ops::Sub<u64> for Version {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod aggregate_id_tests {
        use super::*;

        #[test]
        fn new_creates_id() {
            let id = AggregateId::new("order-123");
            assert_eq!(id.as_str(), "order-123");
        }

        #[test]
        fn from_string_and_str() {
            let id = AggregateId::from("order-123");
            assert_eq!(id.as_str(), "order-123");

            let id2 = AggregateId::from("order-456".to_string());
            assert_eq!(id2.as_str(), "order-456");
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn parse_from_str() {
            let id: AggregateId = "order-123".parse().expect("parse should succeed");
            assert_eq!(id, AggregateId::new("order-123"));
        }

        #[test]
        fn parse_empty_string_fails() {
            let result = "".parse::<AggregateId>();
            assert!(result.is_err());
        }

        #[test]
        fn display() {
            let id = AggregateId::new("order-123");
            assert_eq!(format!("{id}"), "order-123");
        }

        #[test]
        fn equality() {
            let id1 = AggregateId::new("order-123");
            let id2 = AggregateId::new("order-123");
            let id3 = AggregateId::new("order-456");

            assert_eq!(id1, id2);
            assert_ne!(id1, id3);
        }
    }

    mod version_tests {
        use super::*;

        #[test]
        fn initial_version() {
            assert_eq!(Version::INITIAL, Version::new(0));
            assert!(Version::INITIAL.is_initial());
        }

        #[test]
        fn next_version() {
            let v1 = Version::INITIAL.next();
            assert_eq!(v1, Version::new(1));
            assert!(!v1.is_initial());
        }

        #[test]
        fn commit_arithmetic() {
            // A commit of 3 events against base version 5 lands at 8.
            let base = Version::new(5);
            assert_eq!(base + 3, Version::new(8));
            // And the base is recovered by subtracting the batch size.
            assert_eq!(Version::new(8) - 3, base);
        }

        #[test]
        fn ordering() {
            assert!(Version::new(1) < Version::new(2));
            assert!(Version::new(3) > Version::new(1));
        }

        #[test]
        fn u64_conversions() {
            let version = Version::from(42_u64);
            assert_eq!(version.value(), 42);

            let num: u64 = version.into();
            assert_eq!(num, 42);
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", Version::new(42)), "42");
        }
    }
}
