//! Semantic version arithmetic
//!
//! Function unit versions are plain `major.minor.patch` triples. Pre-release
//! and build suffixes are not part of the model and are rejected on parse.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a semantic version string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionFormatError {
    #[error("version string is empty")]
    Empty,

    #[error("invalid semantic version format: {0:?} (expected MAJOR.MINOR.PATCH)")]
    Malformed(String),

    #[error("version component out of range in {0:?}")]
    OutOfRange(String),

    #[error("unsupported version {0}: pre-release and build metadata are not allowed")]
    Unsupported(String),
}

/// A `major.minor.patch` version triple
///
/// Field order drives the derived `Ord`, so comparison is lexicographic on
/// `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemanticVersion {
    /// The version assigned to the first deployment of a unit
    pub const INITIAL: SemanticVersion = SemanticVersion::new(1, 0, 0);

    /// Largest value a single component may take, so every version fits a
    /// signed 64-bit database column
    pub const MAX_COMPONENT: u64 = i64::MAX as u64;

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `major.minor.patch`, ignoring surrounding whitespace
    pub fn parse(text: &str) -> Result<Self, VersionFormatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(VersionFormatError::Empty);
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionFormatError::Malformed(trimmed.to_string()));
        }

        let mut components = [0u64; 3];
        for (slot, part) in components.iter_mut().zip(parts.iter()) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionFormatError::Malformed(trimmed.to_string()));
            }
            *slot = part
                .parse::<u64>()
                .ok()
                .filter(|value| *value <= Self::MAX_COMPONENT)
                .ok_or_else(|| VersionFormatError::OutOfRange(trimmed.to_string()))?;
        }

        Ok(Self::new(components[0], components[1], components[2]))
    }

    /// True when `text` parses as a semantic version
    pub fn is_valid(text: &str) -> bool {
        Self::parse(text).is_ok()
    }

    fn step(&self, component: u64) -> Result<u64, VersionFormatError> {
        component
            .checked_add(1)
            .filter(|next| *next <= Self::MAX_COMPONENT)
            .ok_or_else(|| VersionFormatError::OutOfRange(self.to_string()))
    }

    pub fn increment_major(&self) -> Result<Self, VersionFormatError> {
        Ok(Self::new(self.step(self.major)?, 0, 0))
    }

    pub fn increment_minor(&self) -> Result<Self, VersionFormatError> {
        Ok(Self::new(self.major, self.step(self.minor)?, 0))
    }

    pub fn increment_patch(&self) -> Result<Self, VersionFormatError> {
        Ok(Self::new(self.major, self.minor, self.step(self.patch)?))
    }

    /// Apply the increment named by `change`. Fails with
    /// [`VersionFormatError::OutOfRange`] when the component is already at
    /// [`Self::MAX_COMPONENT`].
    pub fn bump(&self, change: ChangeType) -> Result<Self, VersionFormatError> {
        match change {
            ChangeType::Major => self.increment_major(),
            ChangeType::Minor => self.increment_minor(),
            ChangeType::Patch => self.increment_patch(),
        }
    }

    pub fn greater_than(&self, other: &Self) -> bool {
        self > other
    }

    pub fn less_than(&self, other: &Self) -> bool {
        self < other
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemanticVersion {
    type Err = VersionFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SemanticVersion {
    type Error = VersionFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SemanticVersion> for String {
    fn from(value: SemanticVersion) -> Self {
        value.to_string()
    }
}

impl From<SemanticVersion> for semver::Version {
    fn from(value: SemanticVersion) -> Self {
        semver::Version::new(value.major, value.minor, value.patch)
    }
}

impl TryFrom<&semver::Version> for SemanticVersion {
    type Error = VersionFormatError;

    fn try_from(value: &semver::Version) -> Result<Self, Self::Error> {
        if !value.pre.is_empty() || !value.build.is_empty() {
            return Err(VersionFormatError::Unsupported(value.to_string()));
        }
        if [value.major, value.minor, value.patch]
            .iter()
            .any(|c| *c > Self::MAX_COMPONENT)
        {
            return Err(VersionFormatError::OutOfRange(value.to_string()));
        }
        Ok(Self::new(value.major, value.minor, value.patch))
    }
}

/// Kind of version increment requested for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Major,
    Minor,
    Patch,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Major => "major",
            ChangeType::Minor => "minor",
            ChangeType::Patch => "patch",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a change type string is not one of `major`, `minor`, `patch`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid change type: {0:?} (expected major, minor or patch)")]
pub struct InvalidChangeType(pub String);

impl FromStr for ChangeType {
    type Err = InvalidChangeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "major" => Ok(ChangeType::Major),
            "minor" => Ok(ChangeType::Minor),
            "patch" => Ok(ChangeType::Patch),
            other => Err(InvalidChangeType(other.to_string())),
        }
    }
}
