//! Sentinel files: the durable record of a completed provisioning run.
//!
//! Content is one line, no trailing newline:
//! `"<hex-sha256-of-source>:<RFC3339-UTC>"`. A legacy form containing
//! only the timestamp still reads as "completed" but never matches a
//! checksum comparison, and is never produced.

use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};

use crate::error::{EngineError, Result};

/// Length of a lower-case hex SHA-256 digest.
const CHECKSUM_LEN: usize = 64;

/// Parsed contents of a sentinel file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    /// SHA-256 of the source file at completion time. `None` for the
    /// legacy timestamp-only form.
    pub checksum: Option<String>,
    /// When the provisioning command completed.
    pub timestamp: DateTime<Utc>,
}

impl Sentinel {
    /// A sentinel in the current form.
    #[must_use]
    pub fn new(checksum: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            checksum: Some(checksum),
            timestamp,
        }
    }

    /// Whether this sentinel records the given source checksum.
    ///
    /// Legacy sentinels carry no checksum and never match, so a
    /// provision run re-executes and rewrites them in the current form.
    #[must_use]
    pub fn matches_checksum(&self, checksum: &str) -> bool {
        self.checksum.as_deref() == Some(checksum)
    }

    /// Render the on-disk form (one line, no trailing newline).
    #[must_use]
    pub fn render(&self) -> String {
        let ts = self
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        match &self.checksum {
            Some(checksum) => format!("{checksum}:{ts}"),
            None => ts,
        }
    }

    /// Parse a sentinel file's contents.
    ///
    /// RFC3339 timestamps themselves contain colons, so the split is
    /// positional: the current form is exactly 64 hex characters, a
    /// colon, then the timestamp. Anything else must parse wholesale as
    /// RFC3339 to be accepted as the legacy form.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] for unrecognized contents.
    pub fn parse(contents: &str) -> Result<Self> {
        let contents = contents.trim_end_matches('\n');
        let looks_checksummed = contents.len() > CHECKSUM_LEN
            && contents.as_bytes().get(CHECKSUM_LEN) == Some(&b':')
            && contents
                .bytes()
                .take(CHECKSUM_LEN)
                .all(|b| b.is_ascii_hexdigit());
        if looks_checksummed {
            let checksum = contents
                .get(..CHECKSUM_LEN)
                .unwrap_or_default()
                .to_ascii_lowercase();
            let ts = contents.get(CHECKSUM_LEN + 1..).unwrap_or_default();
            let timestamp = DateTime::parse_from_rfc3339(ts)
                .map_err(|e| EngineError::Invalid(format!("sentinel timestamp '{ts}': {e}")))?
                .with_timezone(&Utc);
            return Ok(Self {
                checksum: Some(checksum),
                timestamp,
            });
        }
        let timestamp = DateTime::parse_from_rfc3339(contents)
            .map_err(|_| EngineError::Invalid(format!("unrecognized sentinel '{contents}'")))?
            .with_timezone(&Utc);
        Ok(Self {
            checksum: None,
            timestamp,
        })
    }
}

/// SHA-256 over raw bytes, lower-case hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn sha256_of_hello() {
        // Known digest of "hello".
        assert_eq!(sha256_hex(b"hello"), HASH);
    }

    #[test]
    fn render_parse_roundtrip() {
        let sentinel = Sentinel::new(
            HASH.to_string(),
            DateTime::parse_from_rfc3339("2026-08-25T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let rendered = sentinel.render();
        assert_eq!(rendered, format!("{HASH}:2026-08-25T10:00:00Z"));
        assert!(!rendered.ends_with('\n'));
        assert_eq!(Sentinel::parse(&rendered).unwrap(), sentinel);
    }

    #[test]
    fn parse_legacy_timestamp_only() {
        let sentinel = Sentinel::parse("2023-01-15T08:30:00Z").unwrap();
        assert_eq!(sentinel.checksum, None);
        assert!(!sentinel.matches_checksum(HASH));
    }

    #[test]
    fn parse_legacy_with_offset() {
        let sentinel = Sentinel::parse("2023-01-15T08:30:00+01:00").unwrap();
        assert_eq!(sentinel.checksum, None);
        assert_eq!(
            sentinel.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "2023-01-15T07:30:00Z"
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = Sentinel::parse("not a sentinel").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn parse_rejects_bad_timestamp_after_checksum() {
        let err = Sentinel::parse(&format!("{HASH}:yesterday")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn checksum_comparison() {
        let sentinel = Sentinel::parse(&format!("{HASH}:2026-08-25T10:00:00Z")).unwrap();
        assert!(sentinel.matches_checksum(HASH));
        assert!(!sentinel.matches_checksum("deadbeef"));
    }

    #[test]
    fn parse_normalizes_checksum_case() {
        let upper = HASH.to_ascii_uppercase();
        let sentinel = Sentinel::parse(&format!("{upper}:2026-08-25T10:00:00Z")).unwrap();
        assert!(sentinel.matches_checksum(HASH));
    }
}
