//! Identifiers and the request variant dimensions a cached page is keyed by.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a post or page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(u64);

impl ContentId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` is not a numeric content id")]
pub struct ParseContentIdError(pub String);

impl FromStr for ContentId {
    type Err = ParseContentIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseContentIdError(raw.to_string()));
        }
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseContentIdError(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Desktop,
    Mobile,
    /// A configured group of mobile user agents served their own copy.
    MobileGroup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visitor {
    Anonymous,
    LoggedIn,
}

impl Visitor {
    pub const ALL: [Visitor; 2] = [Visitor::Anonymous, Visitor::LoggedIn];

    pub fn as_str(self) -> &'static str {
        match self {
            Visitor::Anonymous => "anonymous",
            Visitor::LoggedIn => "logged_in",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub device: Device,
    pub visitor: Visitor,
}

impl Variant {
    pub fn new(device: Device, visitor: Visitor) -> Self {
        Self { device, visitor }
    }

    pub fn anonymous_desktop() -> Self {
        Self::new(Device::Desktop, Visitor::Anonymous)
    }

    pub fn is_anonymous(&self) -> bool {
        self.visitor == Visitor::Anonymous
    }

    /// Stable textual form used as hashing input for cache keys. Changing it
    /// orphans every entry already on disk.
    pub fn canonical(&self) -> String {
        let device = match &self.device {
            Device::Desktop => "desktop".to_string(),
            Device::Mobile => "mobile".to_string(),
            Device::MobileGroup(name) => format!("mobile-group:{name}"),
        };
        format!("device={device};visitor={}", self.visitor.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_accepts_only_digits() {
        assert_eq!("42".parse::<ContentId>(), Ok(ContentId::new(42)));
        assert_eq!(" 7 ".parse::<ContentId>(), Ok(ContentId::new(7)));
        assert!("abc".parse::<ContentId>().is_err());
        assert!("-3".parse::<ContentId>().is_err());
        assert!("+3".parse::<ContentId>().is_err());
        assert!("".parse::<ContentId>().is_err());
        assert!("99999999999999999999999".parse::<ContentId>().is_err());
    }

    #[test]
    fn canonical_forms_differ_per_dimension() {
        let forms = [
            Variant::new(Device::Desktop, Visitor::Anonymous).canonical(),
            Variant::new(Device::Desktop, Visitor::LoggedIn).canonical(),
            Variant::new(Device::Mobile, Visitor::Anonymous).canonical(),
            Variant::new(Device::MobileGroup("mobile".into()), Visitor::Anonymous).canonical(),
        ];
        for (i, left) in forms.iter().enumerate() {
            for right in &forms[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }
}
