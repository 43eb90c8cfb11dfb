//! Customer-facing tracking identifiers.
//!
//! Tracking IDs look like `CC-7G2K9X`: the `CC-` prefix followed by six
//! uppercase alphanumerics. Customers join a delivery room with one of
//! these rather than with internal delivery IDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const PREFIX: &str = "CC-";
const SUFFIX_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid tracking id {0:?}, expected CC- followed by 6 uppercase alphanumerics")]
pub struct InvalidTrackingId(pub String);

/// A validated `CC-XXXXXX` tracking identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    pub fn new(raw: &str) -> Result<Self, InvalidTrackingId> {
        raw.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TrackingId {
    type Err = InvalidTrackingId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let suffix = raw
            .strip_prefix(PREFIX)
            .ok_or_else(|| InvalidTrackingId(raw.to_string()))?;
        let valid = suffix.len() == SUFFIX_LEN
            && suffix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid {
            return Err(InvalidTrackingId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }
}

impl<'de> Deserialize<'de> for TrackingId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
