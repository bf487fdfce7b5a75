//! Time source for sentinel and result timestamps.
//!
//! Sentinels embed an RFC3339 UTC timestamp; injecting the clock keeps
//! sentinel contents deterministic in tests.

use chrono::{DateTime, SecondsFormat, Utc};

/// Abstraction over "now".
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// The current instant rendered as RFC3339 with seconds precision,
    /// `Z` offset (e.g. `2026-08-25T12:00:00Z`).
    fn now_rfc3339(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// A clock pinned to the given RFC3339 instant.
    ///
    /// # Panics
    ///
    /// Panics when `rfc3339` does not parse; intended for test setup only.
    #[must_use]
    pub fn at(rfc3339: &str) -> Self {
        #[allow(clippy::expect_used)]
        Self(
            DateTime::parse_from_rfc3339(rfc3339)
                .expect("invalid RFC3339 instant")
                .with_timezone(&Utc),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_renders_rfc3339_utc() {
        let clock = FixedClock::at("2026-08-25T12:00:00+02:00");
        assert_eq!(clock.now_rfc3339(), "2026-08-25T10:00:00Z");
    }

    #[test]
    fn system_clock_renders_z_offset() {
        let ts = SystemClock.now_rfc3339();
        assert!(ts.ends_with('Z'), "expected Z offset in {ts}");
    }
}
