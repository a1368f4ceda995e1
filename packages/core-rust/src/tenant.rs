//! Validated tenant identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Number of leading characters shown by [`TenantId::redacted`].
const REDACTED_PREFIX_CHARS: usize = 8;

/// Opaque, non-empty tenant token used to scope every database session.
///
/// The only way to obtain a `TenantId` is through [`TenantId::parse`] (or
/// its `FromStr` / `TryFrom` / serde equivalents), which trims surrounding
/// whitespace and rejects empty input. Code holding a `TenantId` can
/// therefore rely on it never being blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parses a raw identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidIdentifier`] if the input is empty or
    /// consists only of whitespace.
    pub fn parse(raw: &str) -> Result<Self, ContextError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ContextError::InvalidIdentifier);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs and confirmations: the first eight characters
    /// followed by `...`.
    #[must_use]
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(REDACTED_PREFIX_CHARS).collect();
        format!("{prefix}...")
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_whitespace() {
        let id = TenantId::parse("  tenant-42\n").unwrap();
        assert_eq!(id.as_str(), "tenant-42");
    }

    #[test]
    fn parse_rejects_empty_and_blank() {
        assert!(matches!(TenantId::parse(""), Err(ContextError::InvalidIdentifier)));
        assert!(matches!(TenantId::parse("   "), Err(ContextError::InvalidIdentifier)));
        assert!(matches!(TenantId::parse("\t\n"), Err(ContextError::InvalidIdentifier)));
    }

    #[test]
    fn redacted_shows_at_most_eight_chars() {
        let id = TenantId::parse("123e4567-e89b-12d3-a456-426614174000").unwrap();
        assert_eq!(id.redacted(), "123e4567...");

        let short = TenantId::parse("abc").unwrap();
        assert_eq!(short.redacted(), "abc...");
    }

    #[test]
    fn redacted_counts_chars_not_bytes() {
        let id = TenantId::parse("ñandú-tenant-001").unwrap();
        assert_eq!(id.redacted(), "ñandú-te...");
    }

    #[test]
    fn display_and_from_str_agree() {
        let id: TenantId = " acme ".parse().unwrap();
        assert_eq!(id.to_string(), "acme");
    }

    #[test]
    fn serde_rejects_blank_identifier() {
        let ok: TenantId = serde_json::from_str("\" acme \"").unwrap();
        assert_eq!(ok.as_str(), "acme");

        let err = serde_json::from_str::<TenantId>("\"   \"");
        assert!(err.is_err());

        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"acme\"");
    }
}
