//! Organization identifier

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rejected organization id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("org_id must be a positive 32-bit integer, got {0:?}")]
pub struct InvalidOrgId(pub String);

/// Positive 32-bit organization id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct OrgId(i32);

impl OrgId {
    /// Validate a raw id
    pub fn new(value: i64) -> Result<Self, InvalidOrgId> {
        match i32::try_from(value) {
            Ok(v) if v > 0 => Ok(Self(v)),
            _ => Err(InvalidOrgId(value.to_string())),
        }
    }

    /// Raw value as stored
    #[inline]
    #[must_use]
    pub fn get(self) -> i32 {
        self.0
    }
}

impl TryFrom<i64> for OrgId {
    type Error = InvalidOrgId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrgId> for i64 {
    fn from(org: OrgId) -> Self {
        i64::from(org.0)
    }
}

impl FromStr for OrgId {
    type Err = InvalidOrgId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .parse::<i64>()
            .map_err(|_| InvalidOrgId(trimmed.to_string()))
            .and_then(Self::new)
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_positive_values() {
        assert_eq!(OrgId::new(67890).unwrap().get(), 67890);
        assert_eq!("  42 ".parse::<OrgId>().unwrap().get(), 42);
    }

    #[test]
    fn rejects_zero_negative_and_overflow() {
        assert!(OrgId::new(0).is_err());
        assert!(OrgId::new(-5).is_err());
        assert!(OrgId::new(i64::from(i32::MAX) + 1).is_err());
        assert!("abc".parse::<OrgId>().is_err());
        assert!("".parse::<OrgId>().is_err());
    }

    #[test]
    fn serializes_as_number() {
        let org = OrgId::new(7).unwrap();
        assert_eq!(serde_json::to_string(&org).unwrap(), "7");
        assert_eq!(serde_json::from_str::<OrgId>("7").unwrap(), org);
        assert!(serde_json::from_str::<OrgId>("0").is_err());
    }
}
