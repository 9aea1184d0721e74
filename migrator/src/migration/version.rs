// Schema version parsing
// Turns manifest versions, the binary's own version and registry bounds into comparable values.
// Both sides of every comparison go through `SchemaVersion::parse`, so ordering stays symmetric.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SEGMENTS: [&str; 3] = ["major", "minor", "patch"];

/// Why a version string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("version string is empty")]
    Empty,
    #[error("version '{input}' is missing its {segment} segment")]
    MissingSegment { input: String, segment: &'static str },
    #[error("version '{input}' has a non-numeric {segment} segment")]
    InvalidSegment { input: String, segment: &'static str },
    #[error("version '{input}' has an unexpected suffix '{suffix}'")]
    InvalidSuffix { input: String, suffix: String },
}

/// A `major.minor.patch` triple with an optional suffix (`-preview`, `+build`, `.4`).
///
/// The suffix is kept for display only. Equality and ordering look at the triple alone, so
/// `1.2.0-preview == 1.2.0`.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    major: u64,
    minor: u64,
    patch: u64,
    suffix: Option<String>,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: None,
        }
    }

    /// Parse a free-form version string. A leading `v`/`V` and surrounding whitespace are ignored.
    pub fn parse(text: &str) -> Result<Self, VersionParseError> {
        let input = text.trim();
        let body = input.strip_prefix(['v', 'V']).unwrap_or(input);
        if body.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let mut parts = [0u64; 3];
        let mut rest = body;
        for (idx, segment) in SEGMENTS.iter().copied().enumerate() {
            if idx > 0 {
                rest = rest
                    .strip_prefix('.')
                    .ok_or_else(|| VersionParseError::MissingSegment {
                        input: input.to_string(),
                        segment,
                    })?;
            }

            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(if rest.is_empty() {
                    VersionParseError::MissingSegment {
                        input: input.to_string(),
                        segment,
                    }
                } else {
                    VersionParseError::InvalidSegment {
                        input: input.to_string(),
                        segment,
                    }
                });
            }

            // Digits only at this point, so the only failure left is u64 overflow.
            parts[idx] = rest[..end]
                .parse::<u64>()
                .map_err(|_| VersionParseError::InvalidSegment {
                    input: input.to_string(),
                    segment,
                })?;
            rest = &rest[end..];
        }

        let suffix = if rest.is_empty() {
            None
        } else if rest.len() > 1 && rest.starts_with(['-', '+', '.']) {
            Some(rest.to_string())
        } else {
            return Err(VersionParseError::InvalidSuffix {
                input: input.to_string(),
                suffix: rest.to_string(),
            });
        };

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            suffix,
        })
    }

    pub fn triple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for SchemaVersion {}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            f.write_str(suffix)?;
        }
        Ok(())
    }
}

impl FromStr for SchemaVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
